use lectern_core::{
    Completion, ExecutionMode, FailedItem, FailureKind, Run, RunStatus, StepRun, TokenUsage,
};
use lectern_error::FlowErrorKind;
use serde_json::json;

fn running_run() -> Run {
    let mut run = Run::new("lesson", json!({"topic": "fractions"}), ExecutionMode::Sync, 3);
    run.start().unwrap();
    run
}

#[test]
fn test_new_run_is_pending() {
    let run = Run::new("lesson", json!({}), ExecutionMode::Background, 2);
    assert_eq!(*run.status(), RunStatus::Pending);
    assert_eq!(*run.execution_mode(), ExecutionMode::Background);
    assert!(run.started_at().is_none());
    assert!(!run.is_terminal());
}

#[test]
fn test_completes_with_full_completion() {
    let mut run = running_run();
    run.complete(json!({"done": true})).unwrap();

    assert_eq!(*run.status(), RunStatus::Completed);
    assert_eq!(*run.completion(), Some(Completion::Full));
    assert_eq!(*run.step_progress(), 3);
    assert!(run.completed_at().is_some());
}

#[test]
fn test_failed_items_make_completion_partial() {
    let mut run = running_run();
    run.record_failed_item(FailedItem {
        batch: "generate".to_string(),
        item: "summary".to_string(),
        kind: FailureKind::Transient,
        message: "timed out".to_string(),
    });
    run.complete(json!({})).unwrap();

    assert_eq!(*run.completion(), Some(Completion::Partial));
    assert_eq!(run.failed_items().len(), 1);
}

#[test]
fn test_terminal_runs_reject_transitions() {
    let mut run = running_run();
    run.fail("boom", Some(json!({"extract": 1}))).unwrap();

    let err = run.complete(json!({})).unwrap_err();
    assert!(matches!(err.kind, FlowErrorKind::InvalidTransition { .. }));
    assert!(run.fail("again", None).is_err());
    assert!(run.start().is_err());

    assert_eq!(*run.status(), RunStatus::Failed);
    assert_eq!(run.error_message().as_deref(), Some("boom"));
    assert_eq!(*run.outputs(), Some(json!({"extract": 1})));
}

#[test]
fn test_pending_run_cannot_complete() {
    let mut run = Run::new("lesson", json!({}), ExecutionMode::Sync, 1);
    assert!(run.complete(json!({})).is_err());
}

#[test]
fn test_progress_is_monotonic_and_bounded() {
    let mut run = running_run();
    run.record_progress(2);
    run.record_progress(1);
    assert_eq!(*run.step_progress(), 2);
    run.record_progress(10);
    assert_eq!(*run.step_progress(), 3);
}

#[test]
fn test_aggregate_sums_finished_step_runs() {
    let mut run = running_run();
    let mut first = StepRun::begin(*run.id(), "extract", 0, 0, None, json!({}));
    first.complete(json!({}), TokenUsage::new(100, 20), 0.25, 1);
    let mut second = StepRun::begin(*run.id(), "generate", 1, 1, None, json!({}));
    second.fail(FailureKind::Fatal, "bad key", TokenUsage::new(10, 0), 0.5, 1);
    let in_flight = StepRun::begin(*run.id(), "validate", 2, 2, None, json!({}));

    run.aggregate(&[second, first, in_flight]);

    assert_eq!(run.usage().total_tokens, 130);
    assert_eq!(run.usage().input_tokens, 110);
    assert!((run.cost_estimate() - 0.75).abs() < 1e-12);
}

#[test]
fn test_aggregate_is_idempotent() {
    let mut run = running_run();
    let steps: Vec<StepRun> = (0..5)
        .map(|i| {
            let mut step = StepRun::begin(*run.id(), format!("s{i}"), i, 0, Some(i), json!({}));
            step.complete(json!({}), TokenUsage::new(7, 3), 0.1, 1);
            step
        })
        .collect();

    run.aggregate(&steps);
    let first = *run.cost_estimate();
    run.aggregate(&steps);

    assert_eq!(*run.cost_estimate(), first);
    assert_eq!(run.usage().total_tokens, 50);
}

#[test]
fn test_statuses_round_trip_through_strings() {
    assert_eq!(RunStatus::Running.to_string(), "running");
    assert_eq!("completed".parse::<RunStatus>().unwrap(), RunStatus::Completed);
    assert_eq!("partial".parse::<FailureKind>().unwrap(), FailureKind::Partial);
}
