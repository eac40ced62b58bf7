//! CLI command definitions.

use clap::{Parser, Subcommand, ValueEnum};
use lectern::ConversationType;
use std::path::PathBuf;

/// Lectern - run LLM workflows and tutoring conversations
#[derive(Parser, Debug)]
#[command(name = "lectern")]
#[command(about = "Run LLM workflows and tutoring conversations", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Configuration file replacing the layered defaults
    #[arg(long, global = true, env = "LECTERN_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a flow from a TOML definition
    Run {
        /// Path to the flow TOML file
        #[arg(long)]
        flow: PathBuf,

        /// Run inputs as inline JSON, or @path to read them from a file
        #[arg(long, default_value = "{}")]
        input: String,

        /// Start the run in the background and report progress until it finishes
        #[arg(long)]
        background: bool,
    },

    /// Print a run and its step history as JSON
    Status {
        /// Run identifier
        run_id: String,
    },

    /// Fail runs interrupted by an earlier process
    Sweep {
        /// Idle threshold in seconds; defaults to flow.stale_run_after_secs
        #[arg(long)]
        stale_after_secs: Option<u64>,
    },

    /// Send one learner turn to a conversation
    Chat {
        /// Conversation identifier
        #[arg(long)]
        conversation: String,

        /// Learner who owns the conversation
        #[arg(long)]
        owner: String,

        /// Turn text
        #[arg(long)]
        message: String,

        /// Kind of conversation
        #[arg(long, value_enum, default_value = "coach")]
        kind: ConversationKind,

        /// Lesson the learner is studying
        #[arg(long)]
        lesson: Option<String>,

        /// Attached resource ids
        #[arg(long = "resource")]
        resources: Vec<String>,
    },
}

/// Conversation kinds accepted on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationKind {
    /// Exercise coach
    Coach,
    /// General learning assistant
    Assistant,
}

impl From<ConversationKind> for ConversationType {
    fn from(kind: ConversationKind) -> Self {
        match kind {
            ConversationKind::Coach => ConversationType::Coach,
            ConversationKind::Assistant => ConversationType::Assistant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_parses() {
        let cli = Cli::try_parse_from([
            "lectern",
            "run",
            "--flow",
            "lesson_pack.toml",
            "--input",
            r#"{"text": "ratios"}"#,
            "--background",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                flow,
                input,
                background,
            } => {
                assert_eq!(flow, PathBuf::from("lesson_pack.toml"));
                assert_eq!(input, r#"{"text": "ratios"}"#);
                assert!(background);
            }
            other => panic!("Expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_command_defaults_to_coach() {
        let cli = Cli::try_parse_from([
            "lectern",
            "chat",
            "--conversation",
            "c-1",
            "--owner",
            "learner-1",
            "--message",
            "Help",
            "--resource",
            "r1",
            "--resource",
            "r2",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Chat {
                kind, resources, ..
            } => {
                assert_eq!(ConversationType::from(kind), ConversationType::Coach);
                assert_eq!(resources, vec!["r1", "r2"]);
            }
            other => panic!("Expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = Cli::try_parse_from([
            "lectern",
            "chat",
            "--conversation",
            "c-1",
            "--owner",
            "o",
            "--message",
            "m",
            "--kind",
            "tutor",
        ]);
        assert!(result.is_err());
    }
}
