//! Configuration, rate limiting and retry policy.
//!
//! Configuration is layered with the `config` crate:
//! bundled defaults, then `~/.config/lectern/lectern.toml`, then
//! `./lectern.toml`. Provider tiers carry both rate limits (enforced by
//! [`RateLimiter`]) and pricing (used to estimate call cost when a model
//! client does not report one).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod limiter;
mod retry;
mod tier;

pub use config::{
    ClientConfig, ConversationConfig, FlowConfig, LecternConfig, ModelTierConfig, ModelsConfig,
    ProviderConfig, RetryConfig, TierConfig,
};
pub use limiter::{RateLimiter, RateLimiterGuard};
pub use retry::RetryPolicy;
pub use tier::Tier;
