//! The flow engine: runs flows and owns their run records.

use crate::executor::{StepExecutor, failure_kind};
use crate::flow::{BatchMembers, BatchStage, Flow, FlowRegistry, Stage};
use crate::step::Step;
use crate::supervisor::BackgroundSupervisor;
use crate::template::lookup;
use chrono::{TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use lectern_core::{
    ExecutionMode, FailedItem, FailureKind, LedgerAttachment, Run, RunId, RunStatus, StepRun,
};
use lectern_error::{FlowError, FlowErrorKind, LecternResult, StepError, StorageErrorKind};
use lectern_interface::{PersistenceContext, PersistenceProvider, RunFilter, RunStore};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_retry2::strategy::ExponentialFactorBackoff;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, error, info, instrument, warn};

/// Key under which run inputs appear in the running context.
pub const INPUT_KEY: &str = "input";

/// Retries of a failed terminal run write after the first attempt.
const TERMINAL_SAVE_RETRIES: usize = 3;

/// Persist a run's terminal state, retrying storage failures.
///
/// Gives up at once when the stored run is already terminal. The error
/// carries the in-memory status so callers can tell what was lost.
pub(crate) async fn persist_terminal(runs: &dyn RunStore, run: &Run) -> Result<(), FlowError> {
    let strategy = ExponentialFactorBackoff::from_millis(50, 2.0).take(TERMINAL_SAVE_RETRIES);
    Retry::spawn(strategy, move || async move {
        runs.update_run(run).await.map_err(|e| {
            if matches!(e.kind, StorageErrorKind::Immutable { .. }) {
                RetryError::Permanent(e)
            } else {
                warn!(run_id = %run.id(), error = %e.kind, "Terminal run write failed, retrying");
                RetryError::transient(e)
            }
        })
    })
    .await
    .map_err(|e| {
        error!(run_id = %run.id(), status = %run.status(), error = %e.kind, "Terminal run state not saved");
        FlowError::new(FlowErrorKind::RunNotSaved {
            run_id: run.id().to_string(),
            status: run.status().to_string(),
            message: e.kind.to_string(),
        })
    })
}

/// A started run.
///
/// Both modes expose the same handle: a sync handle resolves at once, a
/// background handle when the detached task finishes.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    mode: ExecutionMode,
    receiver: oneshot::Receiver<Result<Run, FlowError>>,
}

impl RunHandle {
    /// Id of the run, available before it finishes.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// How the run executes.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Wait for the terminal run record.
    ///
    /// Fails when the run reached a terminal state that storage did not
    /// accept, so the caller never sees an outcome the store does not hold.
    pub async fn wait(self) -> LecternResult<Run> {
        let result = self.receiver.await.map_err(|_| {
            FlowError::new(FlowErrorKind::BackgroundTask(format!(
                "run {} ended without reporting a result",
                self.run_id
            )))
        })?;
        Ok(result?)
    }
}

/// Read-only view of a run and its step history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    /// The run record
    pub run: Run,
    /// Step runs in execution order
    pub steps: Vec<StepRun>,
}

/// Executes registered flows.
///
/// Steps run strictly in declaration order; a batch stage runs its members
/// with bounded concurrency. Each stage's output is stored in the running
/// context under the stage name, next to the run inputs under `input`, and
/// later stages reference it from their templates.
pub struct FlowEngine {
    registry: FlowRegistry,
    executor: Arc<StepExecutor>,
    persistence: Arc<dyn PersistenceProvider>,
    supervisor: BackgroundSupervisor,
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("flows", &self.registry.names())
            .field("executor", &self.executor)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl FlowEngine {
    /// Assemble an engine.
    pub fn new(
        registry: FlowRegistry,
        executor: Arc<StepExecutor>,
        persistence: Arc<dyn PersistenceProvider>,
        supervisor: BackgroundSupervisor,
    ) -> Self {
        Self {
            registry,
            executor,
            persistence,
            supervisor,
        }
    }

    /// Registered flows.
    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    /// The supervisor running background flows.
    pub fn supervisor(&self) -> &BackgroundSupervisor {
        &self.supervisor
    }

    /// Start a run.
    ///
    /// The run is persisted as `pending` before this returns. In sync mode
    /// the run has also finished; in background mode it runs detached.
    #[instrument(skip(self, inputs), fields(flow = flow_name, mode = %mode))]
    pub async fn start(
        &self,
        flow_name: &str,
        inputs: Value,
        mode: ExecutionMode,
    ) -> LecternResult<RunHandle> {
        let flow = self.registry.get(flow_name)?;
        let run = Run::new(flow.name(), inputs, mode, flow.total_steps());
        let run_id = *run.id();

        let context = self.persistence.open_context().await?;
        context.runs.insert_run(&run).await?;
        info!(%run_id, "Run created");

        let executor = Arc::clone(&self.executor);
        let receiver = match mode {
            ExecutionMode::Sync => {
                let result = RunDriver::new(flow, run, executor, context).drive().await;
                let (sender, receiver) = oneshot::channel();
                // Receiver is alive; a send error is impossible here.
                let _ = sender.send(result);
                receiver
            }
            ExecutionMode::Background => {
                self.supervisor
                    .schedule(run_id, move |context| {
                        RunDriver::new(flow, run, executor, context).drive()
                    })
                    .await?
            }
        };

        Ok(RunHandle {
            run_id,
            mode,
            receiver,
        })
    }

    /// Run a flow synchronously, failing if the run fails.
    pub async fn run(&self, flow_name: &str, inputs: Value) -> LecternResult<Run> {
        let run = self
            .start(flow_name, inputs, ExecutionMode::Sync)
            .await?
            .wait()
            .await?;
        if *run.status() == RunStatus::Failed {
            return Err(FlowError::new(FlowErrorKind::RunFailed {
                run_id: run.id().to_string(),
                message: run.error_message().clone().unwrap_or_default(),
            })
            .into());
        }
        Ok(run)
    }

    /// A run and its step history.
    pub async fn get_run(&self, run_id: &RunId) -> LecternResult<Option<RunSnapshot>> {
        let context = self.persistence.open_context().await?;
        let Some(run) = context.runs.find_run(run_id).await? else {
            return Ok(None);
        };
        let steps = context.runs.step_runs(run_id).await?;
        Ok(Some(RunSnapshot { run, steps }))
    }

    /// Runs matching a filter, newest first.
    pub async fn list_runs(&self, filter: &RunFilter) -> LecternResult<Vec<Run>> {
        let context = self.persistence.open_context().await?;
        Ok(context.runs.list_runs(filter).await?)
    }

    /// Fail runs left unfinished by a previous process.
    ///
    /// A non-terminal run is stale when it has not changed for `older_than`
    /// and this process is not executing it. Returns the ids marked failed.
    #[instrument(skip(self))]
    pub async fn recover_stale_runs(&self, older_than: Duration) -> LecternResult<Vec<RunId>> {
        let Some(cutoff) = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(Vec::new());
        };

        let context = self.persistence.open_context().await?;
        let filter = RunFilter {
            updated_before: Some(cutoff),
            ..RunFilter::default()
        };
        let mut recovered = Vec::new();
        for mut run in context.runs.list_runs(&filter).await? {
            if run.is_terminal() || self.supervisor.is_active(run.id()).await {
                continue;
            }
            let message = format!(
                "interrupted: no progress since {} (last stage: {})",
                run.updated_at().to_rfc3339(),
                run.current_step().as_deref().unwrap_or("none")
            );
            let outputs = run.outputs().clone();
            run.fail(message, outputs)?;
            match context.runs.update_run(&run).await {
                Ok(()) => {
                    warn!(run_id = %run.id(), flow = %run.flow_name(), "Marked stale run failed");
                    recovered.push(*run.id());
                }
                Err(e) if matches!(e.kind, StorageErrorKind::Immutable { .. }) => {
                    debug!(run_id = %run.id(), "Run finished while sweeping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(count = recovered.len(), "Stale run sweep finished");
        Ok(recovered)
    }
}

struct MemberResult {
    position: usize,
    step_run: StepRun,
    output: Result<Value, StepError>,
}

/// Drives one run to a terminal state.
struct RunDriver {
    flow: Arc<Flow>,
    run: Run,
    executor: Arc<StepExecutor>,
    context: PersistenceContext,
    step_runs: Vec<StepRun>,
    next_order: u32,
}

impl RunDriver {
    fn new(
        flow: Arc<Flow>,
        run: Run,
        executor: Arc<StepExecutor>,
        context: PersistenceContext,
    ) -> Self {
        Self {
            flow,
            run,
            executor,
            context,
            step_runs: Vec::new(),
            next_order: 0,
        }
    }

    #[instrument(skip_all, fields(run_id = %self.run.id(), flow = %self.flow.name()))]
    async fn drive(mut self) -> Result<Run, FlowError> {
        if let Err(e) = self.run.start() {
            error!(error = %e.kind, "Run could not start");
            return Ok(self.run);
        }
        self.save_run().await;

        let mut running = Map::new();
        running.insert(INPUT_KEY.to_string(), self.run.inputs().clone());
        let mut outputs = Map::new();

        let flow = Arc::clone(&self.flow);
        for (index, stage) in flow.stages().iter().enumerate() {
            let stage_index = index as u32;
            self.run.enter_step(stage.name());
            self.save_run().await;

            let context = Value::Object(running.clone());
            let result = match stage {
                Stage::Step(step) => self.run_single(step.as_ref(), stage_index, context).await,
                Stage::Batch(batch) => self.run_batch(batch, stage_index, &context).await,
            };
            self.run.aggregate(&self.step_runs);

            match result {
                Ok(value) => {
                    running.insert(stage.name().to_string(), value.clone());
                    outputs.insert(stage.name().to_string(), value);
                    self.run.record_progress(stage_index + 1);
                    self.save_run().await;
                }
                Err(message) => {
                    warn!(stage = stage.name(), %message, "Run failed");
                    if let Err(e) = self.run.fail(message, Some(Value::Object(outputs))) {
                        error!(error = %e.kind, "Failed to mark run failed");
                    }
                    persist_terminal(self.context.runs.as_ref(), &self.run).await?;
                    return Ok(self.run);
                }
            }
        }

        match self.run.complete(Value::Object(outputs)) {
            Ok(()) => info!(
                completion = ?self.run.completion(),
                cost = self.run.cost_estimate(),
                "Run completed"
            ),
            Err(e) => error!(error = %e.kind, "Failed to mark run completed"),
        }
        persist_terminal(self.context.runs.as_ref(), &self.run).await?;
        Ok(self.run)
    }

    async fn save_run(&self) {
        if let Err(e) = self.context.runs.update_run(&self.run).await {
            warn!(error = %e.kind, status = %self.run.status(), "Failed to persist run");
        }
    }

    fn claim_orders(&mut self, count: u32) -> u32 {
        let first = self.next_order;
        self.next_order += count;
        first
    }

    async fn run_single(
        &mut self,
        step: &dyn Step,
        stage_index: u32,
        inputs: Value,
    ) -> Result<Value, String> {
        let order = self.claim_orders(1);
        let (step_run, output) = self.run_step(step, inputs, order, stage_index, None).await;
        self.step_runs.push(step_run);
        output.map_err(|e| format!("Step '{}' failed: {}", step.name(), e.kind))
    }

    async fn run_batch(
        &mut self,
        batch: &BatchStage,
        stage_index: u32,
        context: &Value,
    ) -> Result<Value, String> {
        let members: Vec<(Arc<dyn Step>, Value, Option<u32>)> = match batch.members() {
            BatchMembers::Fixed(steps) => steps
                .iter()
                .map(|step| (Arc::clone(step), context.clone(), None))
                .collect(),
            BatchMembers::ForEach { step, source } => {
                let items = match lookup(context, source) {
                    Some(Value::Array(items)) => items,
                    Some(_) => {
                        return Err(format!(
                            "Batch '{}' source '{}' is not an array",
                            batch.name(),
                            source
                        ));
                    }
                    None => {
                        return Err(format!(
                            "Batch '{}' source '{}' is missing",
                            batch.name(),
                            source
                        ));
                    }
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        let mut inputs = context.clone();
                        if let Value::Object(map) = &mut inputs {
                            map.insert("item".to_string(), item.clone());
                            map.insert("item_index".to_string(), Value::from(index));
                        }
                        (Arc::clone(step), inputs, Some(index as u32))
                    })
                    .collect()
            }
        };

        let count = members.len();
        let first_order = self.claim_orders(count as u32);
        debug!(
            batch = batch.name(),
            count,
            max_concurrency = batch.max_concurrency(),
            "Running batch"
        );

        let mut results: Vec<MemberResult> = {
            let driver = &*self;
            let pending: Vec<_> = members
                .into_iter()
                .enumerate()
                .map(|(position, (step, inputs, item_index))| async move {
                    let order = first_order + position as u32;
                    let (step_run, output) = driver
                        .run_step(step.as_ref(), inputs, order, stage_index, item_index)
                        .await;
                    MemberResult {
                        position,
                        step_run,
                        output,
                    }
                })
                .collect();
            stream::iter(pending)
                .buffer_unordered(batch.max_concurrency().max(1))
                .collect()
                .await
        };
        results.sort_by_key(|r| r.position);

        let fixed = matches!(batch.members(), BatchMembers::Fixed(_));
        let mut by_name = Map::new();
        let mut in_order = Vec::new();
        let mut fatal = None;
        for result in results {
            let label = result.step_run.label();
            match result.output {
                Ok(value) => {
                    if fixed {
                        by_name.insert(result.step_run.step_name().clone(), value);
                    } else {
                        in_order.push(value);
                    }
                }
                Err(e) => {
                    let kind = failure_kind(&e);
                    if kind == FailureKind::Fatal && fatal.is_none() {
                        fatal = Some(format!("{}: {}", label, e.kind));
                    }
                    self.run.record_failed_item(FailedItem {
                        batch: batch.name().to_string(),
                        item: label,
                        kind,
                        message: e.kind.to_string(),
                    });
                }
            }
            self.step_runs.push(result.step_run);
        }

        let succeeded = by_name.len() + in_order.len();
        if let Some(reason) = fatal {
            return Err(format!(
                "Batch '{}' member failed fatally: {}",
                batch.name(),
                reason
            ));
        }
        if count > 0 && succeeded == 0 {
            return Err(format!(
                "Batch '{}' failed: all {} members failed",
                batch.name(),
                count
            ));
        }
        if succeeded < count {
            warn!(
                batch = batch.name(),
                succeeded,
                failed = count - succeeded,
                "Batch completed partially"
            );
        }

        Ok(if fixed {
            Value::Object(by_name)
        } else {
            Value::Array(in_order)
        })
    }

    /// Record, execute and finalize one step run.
    async fn run_step(
        &self,
        step: &dyn Step,
        inputs: Value,
        order: u32,
        stage_index: u32,
        item_index: Option<u32>,
    ) -> (StepRun, Result<Value, StepError>) {
        let mut step_run = StepRun::begin(
            *self.run.id(),
            step.name(),
            order,
            stage_index,
            item_index,
            inputs,
        );
        if let Err(e) = self.context.runs.insert_step_run(&step_run).await {
            let err = StepError::fatal(
                step.name(),
                format!("Failed to record step run: {}", e.kind),
            );
            step_run.fail(
                FailureKind::Fatal,
                err.kind.to_string(),
                Default::default(),
                0.0,
                0,
            );
            return (step_run, Err(err));
        }

        let outcome = self
            .executor
            .execute(
                step,
                step_run.inputs(),
                LedgerAttachment::StepRun(*step_run.id()),
                self.context.ledger.as_ref(),
            )
            .await;

        match &outcome.output {
            Ok(value) => step_run.complete(
                value.clone(),
                outcome.usage,
                outcome.cost,
                outcome.attempts,
            ),
            Err(e) => step_run.fail(
                failure_kind(e),
                e.kind.to_string(),
                outcome.usage,
                outcome.cost,
                outcome.attempts,
            ),
        }
        if let Err(e) = self.context.runs.update_step_run(&step_run).await {
            warn!(step = step.name(), error = %e.kind, "Failed to persist step run");
        }
        (step_run, outcome.output)
    }
}
