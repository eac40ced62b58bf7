//! Tests for flows declared in TOML and built in code.

use lectern_core::{Completion, ModelTier};
use lectern_error::FlowErrorKind;
use lectern_flow::{
    BackgroundSupervisor, BatchMembers, BatchStage, Flow, FlowDefinition, FlowEngine,
    FlowRegistry, Stage, StepExecutor, TextStep,
};
use lectern_interface::{ModelClient, ModelContent, PersistenceProvider};
use lectern_models::{MockBehavior, ScriptedModelClient};
use lectern_rate_limit::{LecternConfig, RetryPolicy};
use lectern_storage::InMemoryPersistence;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const LESSON_PACK: &str = r#"
[flow]
name = "lesson_pack"
description = "Extract key points, then write one question per point"

[[stages]]
kind = "step"
name = "extract"
tier = "fast"
prompt = "List the key points of: {{input.text}}"
output_schema = { type = "object", required = ["points"], properties = { points = { type = "array" } } }

[[stages]]
kind = "batch"
name = "questions"
max_concurrency = 2
for_each = "extract.points"

[[stages.steps]]
name = "question"
tier = "deep"
system = "You write quiz questions."
prompt = "Write a quiz question about {{item}}"

[[stages]]
kind = "batch"
name = "extras"

[[stages.steps]]
name = "glossary"
prompt = "Define the terms in {{input.text}}"

[[stages.steps]]
name = "hint"
prompt = "Give a hint for {{input.text}}"
"#;

#[test]
fn test_definition_builds_every_stage() {
    let definition: FlowDefinition = LESSON_PACK.parse().unwrap();
    assert_eq!(definition.flow.name, "lesson_pack");
    assert_eq!(definition.stages.len(), 3);

    let flow = definition.into_flow(4).unwrap();
    assert_eq!(flow.name(), "lesson_pack");
    assert_eq!(flow.stage_names(), vec!["extract", "questions", "extras"]);
    assert_eq!(flow.total_steps(), 3);

    match &flow.stages()[0] {
        Stage::Step(step) => {
            assert_eq!(step.tier(), ModelTier::Fast);
            assert!(step.output_schema().is_some());
        }
        other => panic!("Expected step, got {:?}", other),
    }
    match &flow.stages()[1] {
        Stage::Batch(batch) => {
            assert_eq!(batch.max_concurrency(), 2);
            match batch.members() {
                BatchMembers::ForEach { step, source } => {
                    assert_eq!(step.name(), "question");
                    assert_eq!(step.tier(), ModelTier::Deep);
                    assert_eq!(source, "extract.points");
                }
                other => panic!("Expected for_each batch, got {:?}", other),
            }
        }
        other => panic!("Expected batch, got {:?}", other),
    }
    match &flow.stages()[2] {
        // Undeclared concurrency falls back to the default.
        Stage::Batch(batch) => assert_eq!(batch.max_concurrency(), 4),
        other => panic!("Expected batch, got {:?}", other),
    }
}

#[test]
fn test_definition_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lesson_pack.toml");
    std::fs::write(&path, LESSON_PACK).unwrap();

    let definition = FlowDefinition::from_file(&path).unwrap();
    assert_eq!(
        definition.flow.description.as_deref(),
        Some("Extract key points, then write one question per point")
    );

    let missing = FlowDefinition::from_file(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(missing.kind, FlowErrorKind::Definition(_)));
}

#[test]
fn test_malformed_definitions_are_rejected() {
    let unknown_kind = r#"
[flow]
name = "broken"

[[stages]]
kind = "loop"
name = "again"
prompt = "Hi"
"#;
    let err = unknown_kind.parse::<FlowDefinition>().unwrap_err();
    assert!(matches!(err.kind, FlowErrorKind::Definition(_)));

    let two_fan_out_steps = r#"
[flow]
name = "broken"

[[stages]]
kind = "batch"
name = "fan"
for_each = "input.items"

[[stages.steps]]
name = "a"
prompt = "{{item}}"

[[stages.steps]]
name = "b"
prompt = "{{item}}"
"#;
    let err = two_fan_out_steps
        .parse::<FlowDefinition>()
        .unwrap()
        .into_flow(2)
        .unwrap_err();
    assert!(matches!(err.kind, FlowErrorKind::InvalidBatch { .. }));

    let empty_placeholder = r#"
[flow]
name = "broken"

[[stages]]
kind = "step"
name = "a"
prompt = "Hello {{ }}"
"#;
    let err = empty_placeholder
        .parse::<FlowDefinition>()
        .unwrap()
        .into_flow(2)
        .unwrap_err();
    assert!(matches!(err.kind, FlowErrorKind::Definition(_)));
}

#[test]
fn test_builder_rejects_invalid_flows() {
    let empty = Flow::builder("empty").build().unwrap_err();
    assert!(matches!(empty.kind, FlowErrorKind::EmptyFlow(_)));

    let duplicate = Flow::builder("dup")
        .step(TextStep::new("a", "one").unwrap())
        .step(TextStep::new("a", "two").unwrap())
        .build()
        .unwrap_err();
    assert!(matches!(duplicate.kind, FlowErrorKind::DuplicateStep { .. }));

    let reserved = Flow::builder("reserved")
        .step(TextStep::new("input", "one").unwrap())
        .build()
        .unwrap_err();
    assert!(matches!(reserved.kind, FlowErrorKind::DuplicateStep { .. }));

    let zero = Flow::builder("zero")
        .batch(BatchStage::for_each(
            "fan",
            Arc::new(TextStep::new("a", "{{item}}").unwrap()),
            "input.items",
            0,
        ))
        .build()
        .unwrap_err();
    assert!(matches!(zero.kind, FlowErrorKind::InvalidBatch { .. }));

    let registry = FlowRegistry::new();
    let unknown = registry.get("nope").unwrap_err();
    assert!(matches!(unknown.kind, FlowErrorKind::UnknownFlow(_)));
}

#[tokio::test]
async fn test_declared_flow_runs_end_to_end() {
    let flow = LESSON_PACK
        .parse::<FlowDefinition>()
        .unwrap()
        .into_flow(2)
        .unwrap();
    let client: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient::new().script(
        "extract",
        MockBehavior::Reply(ModelContent::Json(
            json!({"points": ["ratios compare", "rates have units"]}),
        )),
    ));
    let persistence = InMemoryPersistence::new();
    let provider: Arc<dyn PersistenceProvider> = Arc::new(persistence);
    let executor = StepExecutor::new(client, &LecternConfig::default())
        .with_retry_policy(RetryPolicy::new(2, 1, 2, Duration::from_secs(2)));
    let engine = FlowEngine::new(
        FlowRegistry::new().with(flow),
        Arc::new(executor),
        Arc::clone(&provider),
        BackgroundSupervisor::new(provider),
    );

    let run = engine
        .run("lesson_pack", json!({"text": "ratios and rates"}))
        .await
        .unwrap();

    assert_eq!(*run.completion(), Some(Completion::Full));
    let outputs = run.outputs().clone().unwrap();
    assert_eq!(
        outputs["questions"],
        json!([
            "Write a quiz question about ratios compare",
            "Write a quiz question about rates have units"
        ])
    );
    assert_eq!(
        outputs["extras"],
        json!({
            "glossary": "Define the terms in ratios and rates",
            "hint": "Give a hint for ratios and rates"
        })
    );

    let snapshot = engine.get_run(run.id()).await.unwrap().unwrap();
    // extract, two questions, glossary, hint
    assert_eq!(snapshot.steps.len(), 5);
    let stage_indexes: Vec<u32> = snapshot.steps.iter().map(|s| *s.stage_index()).collect();
    assert_eq!(stage_indexes, vec![0, 1, 1, 2, 2]);
    let item_indexes: Vec<Option<u32>> =
        snapshot.steps.iter().map(|s| *s.item_index()).collect();
    assert_eq!(item_indexes, vec![None, Some(0), Some(1), None, None]);
}
