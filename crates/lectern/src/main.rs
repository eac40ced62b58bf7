//! Lectern CLI binary.
//!
//! This binary provides command-line access to Lectern:
//! - Execute flows from TOML definitions, inline or in the background
//! - Inspect runs and recover interrupted ones
//! - Send learner turns to conversations

use clap::Parser;
use lectern::observability::{ObservabilityConfig, init_observability_with_config};
use lectern::{FlowRegistry, Lectern, LecternConfig, persistence_from_env};

mod cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use cli::{Cli, Commands, chat, load_flow, run_flow, show_status, sweep};

    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let cli = Cli::parse();

    let observability = ObservabilityConfig::default().with_json_logs(cli.json_logs);
    let observability = if cli.verbose {
        observability.with_log_level("debug")
    } else {
        observability
    };
    init_observability_with_config(observability)?;

    let config = match &cli.config {
        Some(path) => LecternConfig::from_file(path)?,
        None => LecternConfig::load()?,
    };

    let mut registry = FlowRegistry::new();
    let mut flow_name = String::new();
    if let Commands::Run { flow, .. } = &cli.command {
        let loaded = load_flow(flow, config.flow.default_batch_concurrency)?;
        flow_name = loaded.name().to_string();
        registry.register(loaded);
    }

    let lectern = Lectern::builder(config)
        .persistence(persistence_from_env().await?)
        .flows(registry)
        .build()?;

    // Execute the requested command
    match cli.command {
        Commands::Run {
            flow: _,
            input,
            background,
        } => {
            lectern.recover_stale_runs().await?;
            run_flow(&lectern, &flow_name, &input, background).await?;
        }

        Commands::Status { run_id } => {
            show_status(&lectern, &run_id).await?;
        }

        Commands::Sweep { stale_after_secs } => {
            sweep(&lectern, stale_after_secs).await?;
        }

        Commands::Chat {
            conversation,
            owner,
            message,
            kind,
            lesson,
            resources,
        } => {
            lectern.recover_stale_runs().await?;
            chat(
                &lectern,
                &conversation,
                &owner,
                &message,
                kind.into(),
                lesson,
                resources,
            )
            .await?;
        }
    }

    lectern.shutdown().await;
    Ok(())
}
