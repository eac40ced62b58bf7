//! Persistence contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lectern_core::{
    CallId, ConversationId, LedgerEntry, Run, RunId, RunStatus, Session, StepRun, StepRunId,
};
use lectern_error::StorageError;
use std::sync::Arc;

/// Filter for listing runs.
///
/// # Examples
///
/// ```
/// use lectern_core::RunStatus;
/// use lectern_interface::RunFilterBuilder;
///
/// let filter = RunFilterBuilder::default()
///     .flow_name(Some("lesson".to_string()))
///     .status(Some(RunStatus::Running))
///     .build()
///     .unwrap();
/// assert_eq!(filter.limit, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, derive_builder::Builder)]
#[builder(default)]
pub struct RunFilter {
    /// Only runs of this flow
    pub flow_name: Option<String>,
    /// Only runs in this status
    pub status: Option<RunStatus>,
    /// Only runs whose last activity is older than this
    pub updated_before: Option<DateTime<Utc>>,
    /// Maximum number of runs, newest first
    pub limit: Option<usize>,
}

impl RunFilter {
    /// Whether a run satisfies the filter (ignores `limit`).
    pub fn matches(&self, run: &Run) -> bool {
        self.flow_name
            .as_ref()
            .is_none_or(|name| run.flow_name() == name)
            && self.status.is_none_or(|status| *run.status() == status)
            && self
                .updated_before
                .is_none_or(|before| *run.updated_at() < before)
    }
}

/// Storage for runs and step runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run.
    async fn insert_run(&self, run: &Run) -> Result<(), StorageError>;

    /// Replace a stored run with the given snapshot.
    ///
    /// Terminal runs are immutable.
    async fn update_run(&self, run: &Run) -> Result<(), StorageError>;

    /// Load a run by id.
    async fn find_run(&self, id: &RunId) -> Result<Option<Run>, StorageError>;

    /// List runs matching a filter, newest first.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StorageError>;

    /// Insert a new step run.
    async fn insert_step_run(&self, step_run: &StepRun) -> Result<(), StorageError>;

    /// Replace a stored step run.
    async fn update_step_run(&self, step_run: &StepRun) -> Result<(), StorageError>;

    /// Step runs of a run, sorted by order.
    async fn step_runs(&self, run_id: &RunId) -> Result<Vec<StepRun>, StorageError>;
}

/// Append-only request ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append an entry; ids are never reused.
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StorageError>;

    /// Entries recorded against a step run, in attempt order.
    async fn entries_for_step_run(&self, id: &StepRunId)
    -> Result<Vec<LedgerEntry>, StorageError>;

    /// Entries recorded against a conversation, in time order.
    async fn entries_for_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<LedgerEntry>, StorageError>;

    /// Every attempt of one logical call, in attempt order.
    async fn entries_for_call(&self, id: &CallId) -> Result<Vec<LedgerEntry>, StorageError>;
}

/// Storage for conversation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session with its full transcript.
    async fn find_session(&self, id: &ConversationId) -> Result<Option<Session>, StorageError>;

    /// Save a session; stored messages are never rewritten or removed.
    async fn save_session(&self, session: &Session) -> Result<(), StorageError>;
}

/// One isolated set of store handles.
///
/// Background runs open their own context so their writes commit
/// independently of whoever scheduled them.
#[derive(Clone)]
pub struct PersistenceContext {
    /// Runs and step runs
    pub runs: Arc<dyn RunStore>,
    /// Request ledger
    pub ledger: Arc<dyn LedgerStore>,
    /// Conversation sessions
    pub sessions: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext").finish_non_exhaustive()
    }
}

/// Opens persistence contexts.
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Open a fresh context.
    async fn open_context(&self) -> Result<PersistenceContext, StorageError>;
}
