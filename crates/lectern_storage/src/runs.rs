//! In-memory run and step run storage.

use async_trait::async_trait;
use lectern_core::{Run, RunId, StepRun, StepRunId};
use lectern_error::{StorageError, StorageErrorKind};
use lectern_interface::{RunFilter, RunStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// In-memory store for runs and step runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<RunId, Run>>>,
    step_runs: Arc<RwLock<HashMap<StepRunId, StepRun>>>,
}

impl InMemoryRunStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Whether no runs are stored.
    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    #[instrument(skip(self, run), fields(run_id = %run.id()))]
    async fn insert_run(&self, run: &Run) -> Result<(), StorageError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(run.id()) {
            return Err(StorageError::new(StorageErrorKind::AlreadyExists {
                entity: "run",
                id: run.id().to_string(),
            }));
        }
        runs.insert(*run.id(), run.clone());
        debug!("Inserted run");
        Ok(())
    }

    #[instrument(skip(self, run), fields(run_id = %run.id(), status = %run.status()))]
    async fn update_run(&self, run: &Run) -> Result<(), StorageError> {
        let mut runs = self.runs.write().await;
        let stored = runs.get_mut(run.id()).ok_or_else(|| {
            StorageError::new(StorageErrorKind::NotFound {
                entity: "run",
                id: run.id().to_string(),
            })
        })?;
        if stored.is_terminal() {
            return Err(StorageError::new(StorageErrorKind::Immutable {
                entity: "run",
                id: run.id().to_string(),
            }));
        }
        *stored = run.clone();
        Ok(())
    }

    async fn find_run(&self, id: &RunId) -> Result<Option<Run>, StorageError> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StorageError> {
        let runs = self.runs.read().await;
        let mut matching: Vec<Run> = runs.values().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by(|a, b| b.created_at().cmp(a.created_at()));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    #[instrument(skip(self, step_run), fields(run_id = %step_run.run_id(), step = %step_run.step_name(), order = step_run.order()))]
    async fn insert_step_run(&self, step_run: &StepRun) -> Result<(), StorageError> {
        let mut step_runs = self.step_runs.write().await;
        let duplicate = step_runs.contains_key(step_run.id())
            || step_runs
                .values()
                .any(|s| s.run_id() == step_run.run_id() && s.order() == step_run.order());
        if duplicate {
            return Err(StorageError::new(StorageErrorKind::AlreadyExists {
                entity: "step_run",
                id: format!("{}#{}", step_run.run_id(), step_run.order()),
            }));
        }
        step_runs.insert(*step_run.id(), step_run.clone());
        Ok(())
    }

    async fn update_step_run(&self, step_run: &StepRun) -> Result<(), StorageError> {
        let mut step_runs = self.step_runs.write().await;
        let stored = step_runs.get_mut(step_run.id()).ok_or_else(|| {
            StorageError::new(StorageErrorKind::NotFound {
                entity: "step_run",
                id: step_run.id().to_string(),
            })
        })?;
        *stored = step_run.clone();
        Ok(())
    }

    async fn step_runs(&self, run_id: &RunId) -> Result<Vec<StepRun>, StorageError> {
        let step_runs = self.step_runs.read().await;
        let mut matching: Vec<StepRun> = step_runs
            .values()
            .filter(|s| s.run_id() == run_id)
            .cloned()
            .collect();
        matching.sort_by_key(|s| *s.order());
        Ok(matching)
    }
}
