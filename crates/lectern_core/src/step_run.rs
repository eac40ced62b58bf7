//! Step execution records.

use crate::{FailureKind, RunId, StepRunId, TokenUsage};
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a single step run.
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
pub enum StepStatus {
    /// Step has begun
    #[default]
    Running,
    /// Step produced an output
    Completed,
    /// Step failed; see `failure_kind`
    Failed,
}

/// One execution of one step within a run.
///
/// A step run is created immediately before the step begins and is
/// finalized exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, derive_builder::Builder)]
#[builder(setter(into))]
pub struct StepRun {
    /// Unique step run id
    id: StepRunId,
    /// Owning run
    run_id: RunId,
    /// Step name
    step_name: String,
    /// Position in execution order within the run
    order: u32,
    /// Index of the flow stage this step belongs to
    #[builder(default)]
    stage_index: u32,
    /// Batch member index for batch stages
    #[builder(default)]
    item_index: Option<u32>,
    /// Current status
    #[builder(default)]
    status: StepStatus,
    /// Validated inputs
    #[builder(default)]
    inputs: Value,
    /// Parsed outputs on success
    #[builder(default)]
    outputs: Option<Value>,
    /// Tokens across every attempt
    #[builder(default)]
    usage: TokenUsage,
    /// Cost across every attempt
    #[builder(default)]
    cost_estimate: f64,
    /// Number of model call attempts made
    #[builder(default)]
    attempts: u32,
    /// Wall-clock execution time
    #[builder(default)]
    execution_time_ms: u64,
    /// Failure message
    #[builder(default)]
    error_message: Option<String>,
    /// Failure classification
    #[builder(default)]
    failure_kind: Option<FailureKind>,
    /// Start time
    #[builder(default = "Utc::now()")]
    started_at: DateTime<Utc>,
    /// Finish time
    #[builder(default)]
    completed_at: Option<DateTime<Utc>>,
}

impl StepRun {
    /// Begin a step run.
    pub fn begin(
        run_id: RunId,
        step_name: impl Into<String>,
        order: u32,
        stage_index: u32,
        item_index: Option<u32>,
        inputs: Value,
    ) -> Self {
        Self {
            id: StepRunId::new(),
            run_id,
            step_name: step_name.into(),
            order,
            stage_index,
            item_index,
            status: StepStatus::Running,
            inputs,
            outputs: None,
            usage: TokenUsage::default(),
            cost_estimate: 0.0,
            attempts: 0,
            execution_time_ms: 0,
            error_message: None,
            failure_kind: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Label used in failure reports; includes the item index for batch members.
    pub fn label(&self) -> String {
        match self.item_index {
            Some(index) => format!("{}[{}]", self.step_name, index),
            None => self.step_name.clone(),
        }
    }

    fn finish(&mut self, usage: TokenUsage, cost: f64, attempts: u32) {
        let now = Utc::now();
        self.usage = usage;
        self.cost_estimate = cost.max(0.0);
        self.attempts = attempts;
        self.execution_time_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.completed_at = Some(now);
    }

    /// Finalize as completed.
    pub fn complete(&mut self, outputs: Value, usage: TokenUsage, cost: f64, attempts: u32) {
        self.finish(usage, cost, attempts);
        self.status = StepStatus::Completed;
        self.outputs = Some(outputs);
    }

    /// Finalize as failed.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        usage: TokenUsage,
        cost: f64,
        attempts: u32,
    ) {
        self.finish(usage, cost, attempts);
        self.status = StepStatus::Failed;
        self.failure_kind = Some(kind);
        self.error_message = Some(message.into());
    }
}
