//! PostgreSQL persistence for Lectern.
//!
//! Implements the run, ledger and session stores on top of Diesel with an
//! r2d2 connection pool. Queries run on Tokio's blocking pool so the
//! orchestration code stays async.
//!
//! # Example
//!
//! ```rust,ignore
//! use lectern_database::PgPersistence;
//!
//! let persistence = PgPersistence::from_env()?;
//! persistence.run_migrations().await?;
//! let context = persistence.context();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod conversions;
mod ledger;
mod models;
mod persistence;
mod runs;
mod sessions;

/// Diesel table definitions.
#[allow(missing_docs)]
pub mod schema;

pub use connection::PgPool;
pub use ledger::PgLedgerStore;
pub use models::{LedgerEntryRow, RunRow, SessionMessageRow, SessionRow, StepRunRow};
pub use persistence::{MIGRATIONS, PgPersistence};
pub use runs::PgRunStore;
pub use sessions::PgSessionStore;

use lectern_error::DatabaseError;

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
