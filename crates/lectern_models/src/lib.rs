//! Model client implementations.
//!
//! - [`OpenAiCompatibleClient`] talks to any OpenAI-compatible
//!   `chat/completions` endpoint over HTTP.
//! - [`ScriptedModelClient`] answers from a script; it backs the test
//!   suites and the `scripted` provider of the CLI.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod openai;
mod scripted;

pub use openai::OpenAiCompatibleClient;
pub use scripted::{MockBehavior, MockResponse, ScriptedModelClient};
