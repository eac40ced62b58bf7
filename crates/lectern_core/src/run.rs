//! Flow run records and their lifecycle.

use crate::{RunId, StepRun, StepStatus, TokenUsage};
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use lectern_error::{FlowError, FlowErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a run.
///
/// Runs move forward only: `pending -> running -> (completed | failed)`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet started
    #[default]
    Pending,
    /// Executing steps
    Running,
    /// Finished with outputs
    Completed,
    /// Finished with an error
    Failed,
}

impl RunStatus {
    /// Completed and failed runs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// How the caller asked for a run to execute.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionMode {
    /// Caller waits for the terminal result
    #[default]
    Sync,
    /// Caller receives the run id and polls
    Background,
}

/// Whether a completed run produced every output.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Completion {
    /// Every step and batch member succeeded
    Full,
    /// Some batch members failed; see `failed_items`
    Partial,
}

/// Classification of a step failure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Inputs rejected before any model call
    Validation,
    /// Retry budget exhausted on retryable errors
    Transient,
    /// Some but not all outputs produced
    Partial,
    /// Non-retryable failure
    Fatal,
}

/// A batch member that failed while its siblings continued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Batch (stage) the member belonged to
    pub batch: String,
    /// Member step name, or `<step>[<index>]` for fan-out batches
    pub item: String,
    /// Failure classification
    pub kind: FailureKind,
    /// Error message reported by the step
    pub message: String,
}

/// One execution of a flow.
///
/// Construct new runs with [`Run::new`] and drive them through
/// [`start`](Run::start), [`complete`](Run::complete) and
/// [`fail`](Run::fail). The builder exists to restore runs from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, derive_builder::Builder)]
#[builder(setter(into))]
pub struct Run {
    /// Unique run id
    id: RunId,
    /// Name of the flow being executed
    flow_name: String,
    /// Lifecycle state
    #[builder(default)]
    status: RunStatus,
    /// Sync or background
    #[builder(default)]
    execution_mode: ExecutionMode,
    /// Inputs the run was started with
    #[builder(default)]
    inputs: Value,
    /// Final (or partial, on failure) outputs
    #[builder(default)]
    outputs: Option<Value>,
    /// Name of the stage currently executing
    #[builder(default)]
    current_step: Option<String>,
    /// Number of stages finished
    #[builder(default)]
    step_progress: u32,
    /// Number of stages in the flow
    #[builder(default)]
    total_steps: u32,
    /// Token totals across every step run
    #[builder(default)]
    usage: TokenUsage,
    /// Cost estimate across every step run
    #[builder(default)]
    cost_estimate: f64,
    /// Full or partial completion, set once completed
    #[builder(default)]
    completion: Option<Completion>,
    /// Batch members that failed without failing the run
    #[builder(default)]
    failed_items: Vec<FailedItem>,
    /// Terminal error message
    #[builder(default)]
    error_message: Option<String>,
    /// Creation time
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    /// Time the run entered `running`
    #[builder(default)]
    started_at: Option<DateTime<Utc>>,
    /// Time the run became terminal
    #[builder(default)]
    completed_at: Option<DateTime<Utc>>,
    /// Last mutation; used to find stale runs
    #[builder(default = "Utc::now()")]
    updated_at: DateTime<Utc>,
}

impl Run {
    /// A new pending run.
    pub fn new(
        flow_name: impl Into<String>,
        inputs: Value,
        execution_mode: ExecutionMode,
        total_steps: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            flow_name: flow_name.into(),
            status: RunStatus::Pending,
            execution_mode,
            inputs,
            outputs: None,
            current_step: None,
            step_progress: 0,
            total_steps,
            usage: TokenUsage::default(),
            cost_estimate: 0.0,
            completion: None,
            failed_items: Vec::new(),
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// True once the run is completed or failed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: RunStatus) -> Result<(), FlowError> {
        let allowed = matches!(
            (self.status, to),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        );
        if !allowed {
            return Err(FlowError::new(FlowErrorKind::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            }));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move `pending -> running`.
    pub fn start(&mut self) -> Result<(), FlowError> {
        self.transition(RunStatus::Running)?;
        self.started_at = Some(self.updated_at);
        Ok(())
    }

    /// Record the stage now executing.
    pub fn enter_step(&mut self, step: impl Into<String>) {
        self.current_step = Some(step.into());
        self.updated_at = Utc::now();
    }

    /// Record that `completed` stages have finished.
    ///
    /// Progress never moves backwards.
    pub fn record_progress(&mut self, completed: u32) {
        self.step_progress = self.step_progress.max(completed.min(self.total_steps));
        self.updated_at = Utc::now();
    }

    /// Record a batch member failure that does not fail the run.
    pub fn record_failed_item(&mut self, item: FailedItem) {
        self.failed_items.push(item);
        self.updated_at = Utc::now();
    }

    /// Recompute token and cost totals from the run's step runs.
    ///
    /// Totals are summed in step order so repeated aggregation is exact.
    pub fn aggregate(&mut self, step_runs: &[StepRun]) {
        let mut ordered: Vec<&StepRun> = step_runs
            .iter()
            .filter(|s| s.run_id() == &self.id && *s.status() != StepStatus::Running)
            .collect();
        ordered.sort_by_key(|s| *s.order());
        self.usage = ordered.iter().map(|s| *s.usage()).sum();
        self.cost_estimate = ordered.iter().map(|s| *s.cost_estimate()).sum();
        self.updated_at = Utc::now();
    }

    /// Move `running -> completed`.
    ///
    /// Completion is partial when any batch member failure was recorded.
    pub fn complete(&mut self, outputs: Value) -> Result<(), FlowError> {
        self.transition(RunStatus::Completed)?;
        self.completion = Some(if self.failed_items.is_empty() {
            Completion::Full
        } else {
            Completion::Partial
        });
        self.outputs = Some(outputs);
        self.step_progress = self.total_steps;
        self.current_step = None;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// Move to `failed`, keeping whatever outputs were produced.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        partial_outputs: Option<Value>,
    ) -> Result<(), FlowError> {
        self.transition(RunStatus::Failed)?;
        self.error_message = Some(message.into());
        self.outputs = partial_outputs;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }
}
