//! Composition root tests with the scripted client and in-memory stores.

use chrono::{TimeDelta, Utc};
use lectern::{
    Completion, ConversationId, ExecutionMode, FlowDefinition, FlowRegistry, InMemoryPersistence,
    Lectern, LecternConfig, LecternErrorKind, LedgerStore, ModelClient, PersistenceProvider,
    RunBuilder, RunId, RunStatus, RunStore, SCRIPTED_PROVIDER, ScriptedModelClient, TurnOutcome,
    TurnRequestBuilder, client_for,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const OUTLINE: &str = r#"
[flow]
name = "outline"

[[stages]]
kind = "step"
name = "topics"
prompt = "List topics for {{input.subject}}"

[[stages]]
kind = "batch"
name = "notes"
max_concurrency = 2

[[stages.steps]]
name = "summary"
prompt = "Summarize {{topics}}"

[[stages.steps]]
name = "quiz"
prompt = "Quiz me on {{topics}}"
"#;

fn scripted_lectern(persistence: InMemoryPersistence) -> Lectern {
    let flow = OUTLINE
        .parse::<FlowDefinition>()
        .unwrap()
        .into_flow(4)
        .unwrap();
    let client: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient::new());
    Lectern::builder(LecternConfig::default())
        .client(client)
        .persistence(Arc::new(persistence))
        .flows(FlowRegistry::new().with(flow))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_flow_and_conversation_share_one_ledger() {
    let persistence = InMemoryPersistence::new();
    let lectern = scripted_lectern(persistence.clone());

    let run = lectern
        .engine()
        .run("outline", json!({"subject": "fractions"}))
        .await
        .unwrap();
    assert_eq!(*run.completion(), Some(Completion::Full));
    assert_eq!(
        run.outputs().clone().unwrap()["notes"],
        json!({
            "summary": "Summarize List topics for fractions",
            "quiz": "Quiz me on List topics for fractions"
        })
    );

    let request = TurnRequestBuilder::default()
        .conversation_id("chat-1")
        .owner_id("learner-1")
        .content("What is a denominator?")
        .build()
        .unwrap();
    let outcome = lectern.sessions().advance(request).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Replied { .. }));
    assert_eq!(outcome.reply(), Some("What is a denominator?"));

    let conversation_entries = persistence
        .ledger()
        .entries_for_conversation(&ConversationId::from("chat-1"))
        .await
        .unwrap();
    assert_eq!(conversation_entries.len(), 1);
    // three flow steps plus one conversation turn
    assert_eq!(persistence.ledger().all().await.len(), 4);
}

#[tokio::test]
async fn test_shutdown_waits_for_background_runs() {
    let lectern = scripted_lectern(InMemoryPersistence::new());

    let handle = lectern
        .engine()
        .start(
            "outline",
            json!({"subject": "ratios"}),
            ExecutionMode::Background,
        )
        .await
        .unwrap();
    let run_id = *handle.run_id();

    lectern.shutdown().await;

    let run = lectern.engine().get_run(&run_id).await.unwrap().unwrap().run;
    assert_eq!(*run.status(), RunStatus::Completed);
    assert!(lectern.engine().supervisor().active_runs().await.is_empty());
}

#[tokio::test]
async fn test_recover_stale_runs_uses_configured_threshold() {
    let persistence = InMemoryPersistence::new();
    let lectern = scripted_lectern(persistence.clone());
    let stale = RunBuilder::default()
        .id(RunId::new())
        .flow_name("outline")
        .status(RunStatus::Running)
        .execution_mode(ExecutionMode::Background)
        .total_steps(2_u32)
        .updated_at(Utc::now() - TimeDelta::hours(2))
        .build()
        .unwrap();
    persistence.runs().insert_run(&stale).await.unwrap();

    let recovered = lectern.recover_stale_runs().await.unwrap();
    assert_eq!(recovered, vec![*stale.id()]);

    let context = lectern.persistence().open_context().await.unwrap();
    let swept = context.runs.find_run(stale.id()).await.unwrap().unwrap();
    assert_eq!(*swept.status(), RunStatus::Failed);
}

#[test]
fn test_build_rejects_inconsistent_config() {
    let mut config = LecternConfig::default();
    config.conversation.min_quick_replies = 5;
    config.conversation.max_quick_replies = 2;
    let err = Lectern::builder(config).build().unwrap_err();
    assert!(matches!(err.kind(), LecternErrorKind::Config(_)));

    let mut config = LecternConfig::default();
    config.flow.default_batch_concurrency = 0;
    let err = Lectern::builder(config).build().unwrap_err();
    assert!(matches!(err.kind(), LecternErrorKind::Config(_)));
}

#[test]
fn test_client_for_selects_provider() {
    let mut config = LecternConfig::default();
    config.client.provider = SCRIPTED_PROVIDER.to_string();
    assert_eq!(client_for(&config).provider_name(), "scripted");

    config.client.provider = "openai".to_string();
    assert_eq!(client_for(&config).provider_name(), "openai");
}

#[tokio::test]
async fn test_unknown_flow_is_reported() {
    let lectern = scripted_lectern(InMemoryPersistence::new());
    let err = lectern
        .engine()
        .start("missing", json!({}), ExecutionMode::Sync)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), LecternErrorKind::Flow(_)));
    // Sweeping an empty store is a no-op.
    assert!(
        lectern
            .engine()
            .recover_stale_runs(Duration::from_secs(1))
            .await
            .unwrap()
            .is_empty()
    );
}
