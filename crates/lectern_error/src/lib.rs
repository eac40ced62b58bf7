//! Error types for the Lectern orchestration engine.
//!
//! This crate provides the error types shared by every Lectern crate.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All constructors use `#[track_caller]` for automatic location capture
//!
//! # Examples
//!
//! ```
//! use lectern_error::{LecternResult, ConfigError};
//!
//! fn load() -> LecternResult<String> {
//!     Err(ConfigError::new("missing [retry] section"))?
//! }
//!
//! assert!(load().is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
#[cfg(feature = "database")]
mod database;
mod error;
mod flow;
mod json;
mod model;
mod retry;
mod session;
mod step;
mod storage;

pub use backend::BackendError;
pub use config::ConfigError;
#[cfg(feature = "database")]
pub use database::{DatabaseError, DatabaseErrorKind};
pub use error::{LecternError, LecternErrorKind, LecternResult};
pub use flow::{FlowError, FlowErrorKind};
pub use json::JsonError;
pub use model::{ModelError, ModelErrorKind};
pub use retry::RetryableError;
pub use session::{SessionError, SessionErrorKind};
pub use step::{StepError, StepErrorKind};
pub use storage::{StorageError, StorageErrorKind};
