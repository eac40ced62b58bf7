//! Append-only request ledger storage.

use crate::connection::{PgPool, query_error, storage_error, with_connection, write_error};
use crate::models::LedgerEntryRow;
use crate::schema::ledger_entries;
use async_trait::async_trait;
use diesel::prelude::*;
use lectern_core::{CallId, ConversationId, LedgerEntry, StepRunId};
use lectern_error::{StorageError, StorageErrorKind};
use lectern_interface::LedgerStore;
use tracing::{debug, instrument};

/// PostgreSQL-backed [`LedgerStore`].
///
/// Only inserts are issued; rows are never updated or deleted.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Create a store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn immutable(entity: &'static str, id: String) -> StorageErrorKind {
    StorageErrorKind::Immutable { entity, id }
}

fn into_entries(rows: Vec<LedgerEntryRow>) -> Result<Vec<LedgerEntry>, StorageError> {
    rows.into_iter()
        .map(|row| LedgerEntry::try_from(row).map_err(storage_error))
        .collect()
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self, entry), fields(call_id = %entry.call_id(), attempt = entry.retry_attempt()))]
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StorageError> {
        let row = LedgerEntryRow::from(entry);
        with_connection(&self.pool, move |conn| {
            let id = row.id;
            diesel::insert_into(ledger_entries::table)
                .values(&row)
                .execute(conn)
                .map_err(write_error("ledger entry", id, immutable))?;
            debug!(status = %row.status, "Ledger entry recorded");
            Ok(())
        })
        .await
    }

    async fn entries_for_step_run(
        &self,
        id: &StepRunId,
    ) -> Result<Vec<LedgerEntry>, StorageError> {
        let id = id.as_uuid();
        with_connection(&self.pool, move |conn| {
            let rows: Vec<LedgerEntryRow> = ledger_entries::table
                .filter(ledger_entries::step_run_id.eq(id))
                .order((
                    ledger_entries::retry_attempt.asc(),
                    ledger_entries::started_at.asc(),
                ))
                .select(LedgerEntryRow::as_select())
                .load(conn)
                .map_err(query_error)?;
            into_entries(rows)
        })
        .await
    }

    async fn entries_for_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<LedgerEntry>, StorageError> {
        let id = id.as_str().to_string();
        with_connection(&self.pool, move |conn| {
            let rows: Vec<LedgerEntryRow> = ledger_entries::table
                .filter(ledger_entries::conversation_id.eq(id))
                .order(ledger_entries::started_at.asc())
                .select(LedgerEntryRow::as_select())
                .load(conn)
                .map_err(query_error)?;
            into_entries(rows)
        })
        .await
    }

    async fn entries_for_call(&self, id: &CallId) -> Result<Vec<LedgerEntry>, StorageError> {
        let id = id.as_uuid();
        with_connection(&self.pool, move |conn| {
            let rows: Vec<LedgerEntryRow> = ledger_entries::table
                .filter(ledger_entries::call_id.eq(id))
                .order(ledger_entries::retry_attempt.asc())
                .select(LedgerEntryRow::as_select())
                .load(conn)
                .map_err(query_error)?;
            into_entries(rows)
        })
        .await
    }
}
