//! Conversation session storage.

use crate::connection::{PgPool, query_error, storage_error, with_connection};
use crate::conversions::{rows_to_session, session_to_rows};
use crate::models::{SessionMessageRow, SessionRow};
use crate::schema::{conversation_sessions, session_messages};
use async_trait::async_trait;
use diesel::prelude::*;
use lectern_core::{ConversationId, Session};
use lectern_error::StorageError;
use lectern_interface::SessionStore;
use tracing::{debug, instrument};

/// PostgreSQL-backed [`SessionStore`].
///
/// Messages are keyed by `(conversation_id, sequence)` and inserted with
/// `ON CONFLICT DO NOTHING`, so a save never rewrites stored history.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Create a store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_session(&self, id: &ConversationId) -> Result<Option<Session>, StorageError> {
        let id = id.as_str().to_string();
        with_connection(&self.pool, move |conn| {
            let header = conversation_sessions::table
                .find(&id)
                .select(SessionRow::as_select())
                .first(conn)
                .optional()
                .map_err(query_error)?;
            let Some(header) = header else {
                return Ok(None);
            };

            let messages: Vec<SessionMessageRow> = session_messages::table
                .filter(session_messages::conversation_id.eq(&id))
                .order(session_messages::sequence.asc())
                .select(SessionMessageRow::as_select())
                .load(conn)
                .map_err(query_error)?;

            rows_to_session(header, messages)
                .map(Some)
                .map_err(storage_error)
        })
        .await
    }

    #[instrument(skip(self, session), fields(conversation_id = %session.conversation_id(), messages = session.messages().len()))]
    async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let (header, messages) = session_to_rows(session);
        with_connection(&self.pool, move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::insert_into(conversation_sessions::table)
                    .values(&header)
                    .on_conflict(conversation_sessions::conversation_id)
                    .do_update()
                    .set((
                        conversation_sessions::metadata.eq(&header.metadata),
                        conversation_sessions::last_message_at.eq(header.last_message_at),
                    ))
                    .execute(conn)?;

                if messages.is_empty() {
                    return Ok(());
                }
                let inserted = diesel::insert_into(session_messages::table)
                    .values(&messages)
                    .on_conflict((session_messages::conversation_id, session_messages::sequence))
                    .do_nothing()
                    .execute(conn)?;
                debug!(inserted, "Session saved");
                Ok(())
            })
            .map_err(query_error)
        })
        .await
    }
}
