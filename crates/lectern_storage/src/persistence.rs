//! In-memory persistence provider.

use crate::{InMemoryLedgerStore, InMemoryRunStore, InMemorySessionStore};
use async_trait::async_trait;
use lectern_error::StorageError;
use lectern_interface::{PersistenceContext, PersistenceProvider};
use std::sync::Arc;

/// Provider whose contexts all share one set of in-memory stores.
///
/// Every write commits immediately, so contexts are isolated in the sense
/// that one context's failure never rolls back another's writes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    runs: InMemoryRunStore,
    ledger: InMemoryLedgerStore,
    sessions: InMemorySessionStore,
}

impl InMemoryPersistence {
    /// Create empty stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run store handle.
    pub fn runs(&self) -> &InMemoryRunStore {
        &self.runs
    }

    /// Ledger handle.
    pub fn ledger(&self) -> &InMemoryLedgerStore {
        &self.ledger
    }

    /// Session store handle.
    pub fn sessions(&self) -> &InMemorySessionStore {
        &self.sessions
    }

    /// A context over the shared stores.
    pub fn context(&self) -> PersistenceContext {
        PersistenceContext {
            runs: Arc::new(self.runs.clone()),
            ledger: Arc::new(self.ledger.clone()),
            sessions: Arc::new(self.sessions.clone()),
        }
    }
}

#[async_trait]
impl PersistenceProvider for InMemoryPersistence {
    async fn open_context(&self) -> Result<PersistenceContext, StorageError> {
        Ok(self.context())
    }
}
