//! In-memory persistence.
//!
//! HashMap-backed implementations of every store trait, shared through
//! `Arc<RwLock<..>>`. All data is lost when the last handle is dropped.
//! Used by tests and by the CLI when no database is configured.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ledger;
mod persistence;
mod runs;
mod sessions;

pub use ledger::InMemoryLedgerStore;
pub use persistence::InMemoryPersistence;
pub use runs::InMemoryRunStore;
pub use sessions::InMemorySessionStore;
