//! In-memory request ledger.

use async_trait::async_trait;
use lectern_core::{CallId, ConversationId, LedgerEntry, StepRunId};
use lectern_error::{StorageError, StorageErrorKind};
use lectern_interface::LedgerStore;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only in-memory ledger.
///
/// Entries are kept in append order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    entries: Arc<RwLock<Vec<LedgerEntry>>>,
}

impl InMemoryLedgerStore {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry in append order.
    pub async fn all(&self) -> Vec<LedgerEntry> {
        self.entries.read().await.clone()
    }

    async fn select(&self, predicate: impl Fn(&LedgerEntry) -> bool) -> Vec<LedgerEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.id() == entry.id()) {
            return Err(StorageError::new(StorageErrorKind::Immutable {
                entity: "ledger_entry",
                id: entry.id().to_string(),
            }));
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn entries_for_step_run(
        &self,
        id: &StepRunId,
    ) -> Result<Vec<LedgerEntry>, StorageError> {
        let mut entries = self.select(|e| e.step_run_id().as_ref() == Some(id)).await;
        entries.sort_by_key(|e| *e.retry_attempt());
        Ok(entries)
    }

    async fn entries_for_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<LedgerEntry>, StorageError> {
        Ok(self
            .select(|e| e.conversation_id().as_ref() == Some(id))
            .await)
    }

    async fn entries_for_call(&self, id: &CallId) -> Result<Vec<LedgerEntry>, StorageError> {
        let mut entries = self.select(|e| e.call_id() == id).await;
        entries.sort_by_key(|e| *e.retry_attempt());
        Ok(entries)
    }
}
