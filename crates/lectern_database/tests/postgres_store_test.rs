//! Store tests against a live PostgreSQL database.
//!
//! Run with `DATABASE_URL` set and `--features postgres-tests`.

#![cfg(feature = "postgres-tests")]

use lectern_core::{
    CallId, ConversationId, ConversationType, ExecutionMode, LedgerAttachment,
    LedgerEntryBuilder, LedgerStatus, Role, Run, RunStatus, Session, StepRun, TokenUsage,
};
use lectern_database::PgPersistence;
use lectern_error::StorageErrorKind;
use lectern_interface::{PersistenceContext, PersistenceProvider, RunFilterBuilder};
use serde_json::json;

async fn context() -> PersistenceContext {
    let persistence = PgPersistence::from_env().expect("DATABASE_URL must point at a database");
    persistence.run_migrations().await.expect("migrations");
    persistence.open_context().await.expect("context")
}

#[tokio::test]
async fn test_terminal_runs_reject_updates() {
    let ctx = context().await;
    let mut run = Run::new("pg-lesson", json!({"topic": "ratios"}), ExecutionMode::Sync, 1);
    ctx.runs.insert_run(&run).await.unwrap();

    let err = ctx.runs.insert_run(&run).await.unwrap_err();
    assert!(matches!(err.kind, StorageErrorKind::AlreadyExists { .. }));

    run.start().unwrap();
    ctx.runs.update_run(&run).await.unwrap();
    run.complete(json!({"summary": "ok"})).unwrap();
    ctx.runs.update_run(&run).await.unwrap();

    let stored = ctx.runs.find_run(run.id()).await.unwrap().unwrap();
    assert_eq!(*stored.status(), RunStatus::Completed);
    assert_eq!(stored.outputs(), &Some(json!({"summary": "ok"})));

    let err = ctx.runs.update_run(&stored).await.unwrap_err();
    assert!(matches!(err.kind, StorageErrorKind::Immutable { .. }));

    let listed = ctx
        .runs
        .list_runs(
            &RunFilterBuilder::default()
                .flow_name(Some("pg-lesson".to_string()))
                .status(Some(RunStatus::Completed))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(listed.iter().any(|r| r.id() == run.id()));
}

#[tokio::test]
async fn test_ledger_rows_follow_their_step_run() {
    let ctx = context().await;
    let run = Run::new("pg-ledger", json!({}), ExecutionMode::Sync, 1);
    ctx.runs.insert_run(&run).await.unwrap();
    let step = StepRun::begin(*run.id(), "extract", 0, 0, None, json!({}));
    ctx.runs.insert_step_run(&step).await.unwrap();

    let call_id = CallId::new();
    for attempt in [1u32, 2] {
        let status = if attempt == 1 {
            LedgerStatus::Failed
        } else {
            LedgerStatus::Succeeded
        };
        let entry = LedgerEntryBuilder::default()
            .call_id(call_id)
            .attachment(LedgerAttachment::StepRun(*step.id()))
            .provider("scripted")
            .model("m")
            .usage(TokenUsage::new(10, 5))
            .cost_estimate(0.001)
            .status(status)
            .retry_attempt(attempt)
            .build()
            .unwrap();
        ctx.ledger.append(&entry).await.unwrap();

        let err = ctx.ledger.append(&entry).await.unwrap_err();
        assert!(matches!(err.kind, StorageErrorKind::Immutable { .. }));
    }

    let entries = ctx.ledger.entries_for_step_run(step.id()).await.unwrap();
    let attempts: Vec<u32> = entries.iter().map(|e| *e.retry_attempt()).collect();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(ctx.ledger.entries_for_call(&call_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_session_saves_never_drop_messages() {
    let ctx = context().await;
    let id = ConversationId::new(uuid::Uuid::new_v4().to_string());
    let mut session = Session::open(id.clone(), "learner-1", ConversationType::Coach);
    session.append(Role::Assistant, "Welcome back", None);
    ctx.sessions.save_session(&session).await.unwrap();

    let stale = session.clone();
    session.append(Role::User, "What is a ratio?", None);
    session.set_meta("intro_topic", json!("ratios"));
    ctx.sessions.save_session(&session).await.unwrap();
    ctx.sessions.save_session(&stale).await.unwrap();

    let stored = ctx.sessions.find_session(&id).await.unwrap().unwrap();
    assert_eq!(stored.messages().len(), 2);
    assert_eq!(stored.messages()[1].content, "What is a ratio?");
    assert_eq!(stored.owner_id(), "learner-1");
}
