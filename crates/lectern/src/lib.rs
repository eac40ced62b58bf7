//! Lectern - LLM workflow and conversation orchestration
//!
//! Lectern runs multi-step LLM workflows and tutoring conversations on top of
//! an unreliable model provider, with a durable record of every call.
//!
//! # Features
//!
//! - **Flows**: ordered steps and bounded-parallel batches, declared in code or TOML
//! - **Background runs**: detached execution with progress polling and stale-run recovery
//! - **Conversations**: serialized turns, introduction synthesis, answer-safe quick replies
//! - **Request Ledger**: one append-only entry per model call attempt, with usage and cost
//! - **Retries and limits**: exponential backoff with jitter and per-tier rate limiting
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lectern::{ExecutionMode, FlowDefinition, FlowRegistry, Lectern, LecternConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LecternConfig::load()?;
//!     let flow = FlowDefinition::from_file("lesson_pack.toml")?
//!         .into_flow(config.flow.default_batch_concurrency)?;
//!     let lectern = Lectern::builder(config)
//!         .flows(FlowRegistry::new().with(flow))
//!         .build()?;
//!
//!     let run = lectern.engine().run("lesson_pack", json!({"text": "..."})).await?;
//!     println!("{:?}", run.outputs());
//!     Ok(())
//! }
//! ```
//!
//! # Cargo Features
//!
//! - `database` (default) - PostgreSQL persistence through `lectern_database`
//!
//! # Architecture
//!
//! - `lectern_error` - Error types
//! - `lectern_core` - Runs, step runs, ledger entries, sessions
//! - `lectern_interface` - Model client and store traits
//! - `lectern_rate_limit` - Configuration, rate limiting and retry policy
//! - `lectern_models` - OpenAI-compatible and scripted model clients
//! - `lectern_storage` - In-memory stores
//! - `lectern_database` - PostgreSQL stores
//! - `lectern_flow` - Steps, flows, the flow engine and background supervisor
//! - `lectern_conversation` - Conversation session manager
//!
//! This crate re-exports everything for convenience.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod app;
pub mod observability;

pub use app::{Lectern, LecternBuilder, SCRIPTED_PROVIDER, client_for, persistence_from_env};

pub use lectern_conversation::*;
pub use lectern_core::*;
pub use lectern_error::*;
pub use lectern_flow::*;
pub use lectern_interface::*;
pub use lectern_models::{MockBehavior, MockResponse, OpenAiCompatibleClient, ScriptedModelClient};
pub use lectern_rate_limit::{
    ClientConfig, ConversationConfig, FlowConfig, LecternConfig, ModelsConfig, RateLimiter,
    RetryConfig, RetryPolicy,
};
pub use lectern_storage::{
    InMemoryLedgerStore, InMemoryPersistence, InMemoryRunStore, InMemorySessionStore,
};

#[cfg(feature = "database")]
pub use lectern_database::PgPersistence;
