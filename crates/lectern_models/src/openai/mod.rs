//! OpenAI-compatible chat completions client.

mod client;
mod dto;

pub use client::OpenAiCompatibleClient;
