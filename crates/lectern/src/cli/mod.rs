//! Command-line interface module.
//!
//! This module provides the CLI structure and command handlers for the lectern binary.

mod chat;
mod commands;
mod run;
mod runs;

pub use chat::chat;
pub use commands::{Cli, Commands};
pub use run::{load_flow, run_flow};
pub use runs::{show_status, sweep};
