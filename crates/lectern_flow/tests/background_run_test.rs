//! Background execution, supervisor panics and stale run recovery.

use chrono::{TimeDelta, Utc};
use lectern_core::{
    ExecutionMode, ModelTier, Message, Run, RunBuilder, RunId, RunStatus, StepStatus,
};
use lectern_error::StepError;
use lectern_flow::{
    BackgroundSupervisor, BatchStage, Flow, FlowEngine, FlowRegistry, Step, StepExecutor,
    TextStep,
};
use lectern_interface::{
    ModelClient, ModelContent, PersistenceProvider, RunFilterBuilder, RunStore,
};
use lectern_models::ScriptedModelClient;
use lectern_rate_limit::{LecternConfig, RetryPolicy};
use lectern_storage::InMemoryPersistence;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn engine_with(client: ScriptedModelClient, flow: Flow) -> (FlowEngine, InMemoryPersistence) {
    let persistence = InMemoryPersistence::new();
    let provider: Arc<dyn PersistenceProvider> = Arc::new(persistence.clone());
    let client: Arc<dyn ModelClient> = Arc::new(client);
    let executor = StepExecutor::new(client, &LecternConfig::default())
        .with_retry_policy(RetryPolicy::new(2, 1, 2, Duration::from_secs(2)));
    let engine = FlowEngine::new(
        FlowRegistry::new().with(flow),
        Arc::new(executor),
        Arc::clone(&provider),
        BackgroundSupervisor::new(provider),
    );
    (engine, persistence)
}

fn slow_flow() -> Flow {
    Flow::builder("slow")
        .step(TextStep::new("outline", "Outline {{input.topic}}").unwrap())
        .batch(BatchStage::for_each(
            "sections",
            Arc::new(TextStep::new("section", "Write about {{item}}").unwrap()),
            "input.parts",
            2,
        ))
        .step(TextStep::new("summary", "Summarize {{outline}}").unwrap())
        .build()
        .unwrap()
}

#[derive(Debug)]
struct PanickingStep;

impl Step for PanickingStep {
    fn name(&self) -> &str {
        "explode"
    }

    fn tier(&self) -> ModelTier {
        ModelTier::Fast
    }

    fn validate_inputs(&self, _inputs: &Value) -> Result<(), StepError> {
        Ok(())
    }

    fn build_messages(&self, _inputs: &Value) -> Result<Vec<Message>, StepError> {
        Ok(vec![Message::user("Go")])
    }

    fn parse_output(&self, _content: ModelContent) -> Result<Value, StepError> {
        panic!("parser invariant broken")
    }
}

fn old_run(status: RunStatus, age: TimeDelta) -> Run {
    RunBuilder::default()
        .id(RunId::new())
        .flow_name("slow")
        .status(status)
        .execution_mode(ExecutionMode::Background)
        .current_step(Some("outline".to_string()))
        .total_steps(3_u32)
        .updated_at(Utc::now() - age)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_background_run_returns_before_completion() {
    let client = ScriptedModelClient::new()
        .with_delay("outline", Duration::from_millis(150))
        .with_delay("section", Duration::from_millis(20));
    let (engine, _) = engine_with(client, slow_flow());

    let handle = engine
        .start(
            "slow",
            json!({"topic": "ratios", "parts": ["a", "b", "c"]}),
            ExecutionMode::Background,
        )
        .await
        .unwrap();
    assert_eq!(handle.mode(), ExecutionMode::Background);
    let run_id = *handle.run_id();

    // Persisted and still in flight.
    let snapshot = engine.get_run(&run_id).await.unwrap().unwrap();
    assert!(!snapshot.run.is_terminal());
    assert_eq!(*snapshot.run.execution_mode(), ExecutionMode::Background);
    assert!(engine.supervisor().is_active(&run_id).await);

    // Poll until terminal; progress never moves backwards.
    let mut last_progress = 0;
    let run = loop {
        let snapshot = engine.get_run(&run_id).await.unwrap().unwrap();
        assert!(*snapshot.run.step_progress() >= last_progress);
        last_progress = *snapshot.run.step_progress();
        if snapshot.run.is_terminal() {
            break snapshot.run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(*run.status(), RunStatus::Completed);
    assert_eq!(*run.step_progress(), 3);

    let finished = handle.wait().await.unwrap();
    assert_eq!(finished, run);
    assert!(!engine.supervisor().is_active(&run_id).await);

    let snapshot = engine.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(snapshot.steps.len(), 5);
    assert!(snapshot
        .steps
        .iter()
        .all(|s| *s.status() == StepStatus::Completed));
}

#[tokio::test]
async fn test_drain_waits_for_background_runs() {
    let client = ScriptedModelClient::new().with_delay("outline", Duration::from_millis(50));
    let (engine, _) = engine_with(client, slow_flow());

    let mut ids = Vec::new();
    for topic in ["ratios", "fractions"] {
        let handle = engine
            .start(
                "slow",
                json!({"topic": topic, "parts": ["a"]}),
                ExecutionMode::Background,
            )
            .await
            .unwrap();
        ids.push(*handle.run_id());
    }
    assert_eq!(engine.supervisor().active_runs().await.len(), 2);

    engine.supervisor().drain().await;

    assert!(engine.supervisor().active_runs().await.is_empty());
    for id in ids {
        let run = engine.get_run(&id).await.unwrap().unwrap().run;
        assert_eq!(*run.status(), RunStatus::Completed);
    }
}

#[tokio::test]
async fn test_panicking_background_run_is_marked_failed() {
    let flow = Flow::builder("explode").step(PanickingStep).build().unwrap();
    let (engine, _) = engine_with(ScriptedModelClient::new(), flow);

    let handle = engine
        .start("explode", json!({}), ExecutionMode::Background)
        .await
        .unwrap();
    let run_id = *handle.run_id();
    let run = handle.wait().await.unwrap();

    assert_eq!(*run.status(), RunStatus::Failed);
    let message = run.error_message().clone().unwrap();
    assert!(message.starts_with("panicked:"));
    assert!(message.contains("parser invariant broken"));

    let stored = engine.get_run(&run_id).await.unwrap().unwrap().run;
    assert_eq!(*stored.status(), RunStatus::Failed);
    assert!(!engine.supervisor().is_active(&run_id).await);
}

#[tokio::test]
async fn test_supervisor_reports_runs_it_did_not_create() {
    let persistence = InMemoryPersistence::new();
    let supervisor = BackgroundSupervisor::new(Arc::new(persistence.clone()));
    let mut run = Run::new("adhoc", json!({}), ExecutionMode::Background, 1);
    persistence.runs().insert_run(&run).await.unwrap();
    let run_id = *run.id();

    let receiver = supervisor
        .schedule(run_id, move |context| async move {
            run.start().unwrap();
            run.complete(json!({"done": true})).unwrap();
            context.runs.update_run(&run).await.unwrap();
            Ok(run)
        })
        .await
        .unwrap();

    let finished = receiver.await.unwrap().unwrap();
    assert_eq!(*finished.status(), RunStatus::Completed);
    let stored = persistence.runs().find_run(&run_id).await.unwrap().unwrap();
    assert_eq!(stored, finished);
}

#[tokio::test]
async fn test_stale_runs_are_marked_interrupted() {
    let (engine, persistence) = engine_with(ScriptedModelClient::new(), slow_flow());

    let stale_running = old_run(RunStatus::Running, TimeDelta::hours(3));
    let stale_pending = old_run(RunStatus::Pending, TimeDelta::hours(3));
    let fresh_running = old_run(RunStatus::Running, TimeDelta::seconds(5));
    let old_completed = old_run(RunStatus::Completed, TimeDelta::hours(3));
    for run in [&stale_running, &stale_pending, &fresh_running, &old_completed] {
        persistence.runs().insert_run(run).await.unwrap();
    }

    let mut recovered = engine
        .recover_stale_runs(Duration::from_secs(3600))
        .await
        .unwrap();
    recovered.sort();
    let mut expected = vec![*stale_running.id(), *stale_pending.id()];
    expected.sort();
    assert_eq!(recovered, expected);

    let swept = engine.get_run(stale_running.id()).await.unwrap().unwrap().run;
    assert_eq!(*swept.status(), RunStatus::Failed);
    let message = swept.error_message().clone().unwrap();
    assert!(message.starts_with("interrupted:"));
    assert!(message.contains("outline"));

    let untouched = engine.get_run(fresh_running.id()).await.unwrap().unwrap().run;
    assert_eq!(*untouched.status(), RunStatus::Running);
    let completed = engine.get_run(old_completed.id()).await.unwrap().unwrap().run;
    assert_eq!(*completed.status(), RunStatus::Completed);

    // A second sweep finds nothing left to recover.
    assert!(engine
        .recover_stale_runs(Duration::from_secs(3600))
        .await
        .unwrap()
        .is_empty());

    let failed = engine
        .list_runs(
            &RunFilterBuilder::default()
                .status(Some(RunStatus::Failed))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(failed.len(), 2);
}
