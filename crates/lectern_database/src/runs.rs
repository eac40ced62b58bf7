//! Run and step run storage.

use crate::connection::{PgPool, query_error, storage_error, with_connection, write_error};
use crate::models::{RunRow, StepRunRow};
use crate::schema::{runs, step_runs};
use async_trait::async_trait;
use diesel::prelude::*;
use lectern_core::{Run, RunId, StepRun};
use lectern_error::{StorageError, StorageErrorKind};
use lectern_interface::{RunFilter, RunStore};
use tracing::{debug, instrument};

const TERMINAL: [&str; 2] = ["completed", "failed"];

/// PostgreSQL-backed [`RunStore`].
#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    /// Create a store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn already_exists(entity: &'static str, id: String) -> StorageErrorKind {
    StorageErrorKind::AlreadyExists { entity, id }
}

#[async_trait]
impl RunStore for PgRunStore {
    #[instrument(skip(self, run), fields(run_id = %run.id()))]
    async fn insert_run(&self, run: &Run) -> Result<(), StorageError> {
        let row = RunRow::from(run);
        with_connection(&self.pool, move |conn| {
            let id = row.id;
            diesel::insert_into(runs::table)
                .values(&row)
                .execute(conn)
                .map_err(write_error("run", id, already_exists))?;
            debug!("Inserted run");
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, run), fields(run_id = %run.id(), status = %run.status()))]
    async fn update_run(&self, run: &Run) -> Result<(), StorageError> {
        let row = RunRow::from(run);
        with_connection(&self.pool, move |conn| {
            let id = row.id;
            let changed = diesel::update(
                runs::table
                    .filter(runs::id.eq(id))
                    .filter(runs::status.ne_all(TERMINAL)),
            )
            .set(&row)
            .execute(conn)
            .map_err(query_error)?;

            if changed > 0 {
                return Ok(());
            }

            let exists: bool =
                diesel::select(diesel::dsl::exists(runs::table.filter(runs::id.eq(id))))
                    .get_result(conn)
                    .map_err(query_error)?;
            let kind = if exists {
                StorageErrorKind::Immutable {
                    entity: "run",
                    id: id.to_string(),
                }
            } else {
                StorageErrorKind::NotFound {
                    entity: "run",
                    id: id.to_string(),
                }
            };
            Err(StorageError::new(kind))
        })
        .await
    }

    async fn find_run(&self, id: &RunId) -> Result<Option<Run>, StorageError> {
        let id = id.as_uuid();
        with_connection(&self.pool, move |conn| {
            let row = runs::table
                .find(id)
                .select(RunRow::as_select())
                .first(conn)
                .optional()
                .map_err(query_error)?;
            row.map(Run::try_from).transpose().map_err(storage_error)
        })
        .await
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StorageError> {
        let filter = filter.clone();
        with_connection(&self.pool, move |conn| {
            let mut query = runs::table.select(RunRow::as_select()).into_boxed();
            if let Some(name) = filter.flow_name {
                query = query.filter(runs::flow_name.eq(name));
            }
            if let Some(status) = filter.status {
                query = query.filter(runs::status.eq(status.to_string()));
            }
            if let Some(before) = filter.updated_before {
                query = query.filter(runs::updated_at.lt(before));
            }
            query = query.order(runs::created_at.desc());
            if let Some(limit) = filter.limit {
                query = query.limit(i64::try_from(limit).unwrap_or(i64::MAX));
            }

            let rows: Vec<RunRow> = query.load(conn).map_err(query_error)?;
            rows.into_iter()
                .map(|row| Run::try_from(row).map_err(storage_error))
                .collect()
        })
        .await
    }

    #[instrument(skip(self, step_run), fields(step = %step_run.label()))]
    async fn insert_step_run(&self, step_run: &StepRun) -> Result<(), StorageError> {
        let row = StepRunRow::from(step_run);
        with_connection(&self.pool, move |conn| {
            let id = row.id;
            diesel::insert_into(step_runs::table)
                .values(&row)
                .execute(conn)
                .map_err(write_error("step run", id, already_exists))?;
            Ok(())
        })
        .await
    }

    async fn update_step_run(&self, step_run: &StepRun) -> Result<(), StorageError> {
        let row = StepRunRow::from(step_run);
        with_connection(&self.pool, move |conn| {
            let id = row.id;
            let changed = diesel::update(step_runs::table.find(id))
                .set(&row)
                .execute(conn)
                .map_err(query_error)?;
            if changed == 0 {
                return Err(StorageError::new(StorageErrorKind::NotFound {
                    entity: "step run",
                    id: id.to_string(),
                }));
            }
            Ok(())
        })
        .await
    }

    async fn step_runs(&self, run_id: &RunId) -> Result<Vec<StepRun>, StorageError> {
        let run_id = run_id.as_uuid();
        with_connection(&self.pool, move |conn| {
            let rows: Vec<StepRunRow> = step_runs::table
                .filter(step_runs::run_id.eq(run_id))
                .order(step_runs::step_order.asc())
                .select(StepRunRow::as_select())
                .load(conn)
                .map_err(query_error)?;
            rows.into_iter()
                .map(|row| StepRun::try_from(row).map_err(storage_error))
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::RunStatus;

    #[test]
    fn test_terminal_filter_matches_status_enum() {
        for status in TERMINAL {
            let parsed: RunStatus = status.parse().unwrap();
            assert!(parsed.is_terminal());
        }
        assert!(!RunStatus::Running.is_terminal());
    }
}
