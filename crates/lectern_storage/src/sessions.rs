//! In-memory conversation sessions.

use async_trait::async_trait;
use lectern_core::{ConversationId, Session};
use lectern_error::StorageError;
use lectern_interface::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// In-memory session store.
///
/// Saving never drops stored messages: a snapshot shorter than the stored
/// transcript only updates metadata.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<ConversationId, Session>>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn find_session(&self, id: &ConversationId) -> Result<Option<Session>, StorageError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().await;
        let merged = match sessions.get(session.conversation_id()) {
            Some(stored) if stored.messages().len() > session.messages().len() => {
                warn!(
                    conversation_id = %session.conversation_id(),
                    stored = stored.messages().len(),
                    incoming = session.messages().len(),
                    "Stale session snapshot; keeping stored transcript"
                );
                Session::restore(
                    session.conversation_id().clone(),
                    session.owner_id().clone(),
                    *session.conversation_type(),
                    stored.messages().clone(),
                    session.metadata().clone(),
                    *stored.created_at(),
                )
            }
            _ => session.clone(),
        };
        sessions.insert(session.conversation_id().clone(), merged);
        Ok(())
    }
}
