use lectern_core::{
    CallId, ConversationId, ConversationType, ExecutionMode, LedgerAttachment,
    LedgerEntryBuilder, LedgerStatus, Role, Run, RunStatus, Session, StepRun,
};
use lectern_error::StorageErrorKind;
use lectern_interface::{
    LedgerStore, PersistenceProvider, RunFilter, RunStore, SessionStore,
};
use lectern_storage::{InMemoryPersistence, InMemoryRunStore, InMemorySessionStore};
use serde_json::json;

#[tokio::test]
async fn test_run_round_trip_and_terminal_immutability() {
    let store = InMemoryRunStore::new();
    let mut run = Run::new("lesson", json!({"a": 1}), ExecutionMode::Sync, 1);
    store.insert_run(&run).await.unwrap();
    assert!(store.insert_run(&run).await.is_err());

    run.start().unwrap();
    store.update_run(&run).await.unwrap();
    run.complete(json!({"done": true})).unwrap();
    store.update_run(&run).await.unwrap();

    let loaded = store.find_run(run.id()).await.unwrap().unwrap();
    assert_eq!(*loaded.status(), RunStatus::Completed);

    let err = store.update_run(&loaded).await.unwrap_err();
    assert!(matches!(err.kind, StorageErrorKind::Immutable { .. }));
}

#[tokio::test]
async fn test_step_runs_are_sorted_and_orders_unique() {
    let store = InMemoryRunStore::new();
    let run = Run::new("lesson", json!({}), ExecutionMode::Sync, 3);
    store.insert_run(&run).await.unwrap();

    for order in [2u32, 0, 1] {
        let step = StepRun::begin(*run.id(), format!("s{order}"), order, order, None, json!({}));
        store.insert_step_run(&step).await.unwrap();
    }
    let duplicate = StepRun::begin(*run.id(), "again", 1, 1, None, json!({}));
    assert!(store.insert_step_run(&duplicate).await.is_err());

    let orders: Vec<u32> = store
        .step_runs(run.id())
        .await
        .unwrap()
        .iter()
        .map(|s| *s.order())
        .collect();
    assert_eq!(orders, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_list_runs_filters_and_limits() {
    let store = InMemoryRunStore::new();
    for name in ["a", "b", "a"] {
        let run = Run::new(name, json!({}), ExecutionMode::Background, 1);
        store.insert_run(&run).await.unwrap();
    }

    let filter = RunFilter {
        flow_name: Some("a".into()),
        ..Default::default()
    };
    assert_eq!(store.list_runs(&filter).await.unwrap().len(), 2);

    let limited = RunFilter {
        limit: Some(1),
        ..Default::default()
    };
    assert_eq!(store.list_runs(&limited).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ledger_is_append_only_and_grouped_by_call() {
    let persistence = InMemoryPersistence::new();
    let context = persistence.open_context().await.unwrap();
    let call_id = CallId::new();
    let step = StepRun::begin(lectern_core::RunId::new(), "s", 0, 0, None, json!({}));

    for attempt in [2u32, 1] {
        let entry = LedgerEntryBuilder::default()
            .call_id(call_id)
            .attachment(LedgerAttachment::StepRun(*step.id()))
            .provider("scripted")
            .model("m")
            .status(LedgerStatus::Failed)
            .retry_attempt(attempt)
            .build()
            .unwrap();
        context.ledger.append(&entry).await.unwrap();
        assert!(context.ledger.append(&entry).await.is_err());
    }

    let attempts: Vec<u32> = context
        .ledger
        .entries_for_call(&call_id)
        .await
        .unwrap()
        .iter()
        .map(|e| *e.retry_attempt())
        .collect();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(
        context.ledger.entries_for_step_run(step.id()).await.unwrap().len(),
        2
    );
    assert_eq!(persistence.ledger().all().await.len(), 2);
}

#[tokio::test]
async fn test_stale_session_snapshot_never_drops_messages() {
    let store = InMemorySessionStore::new();
    let id = ConversationId::from("c-1");
    let mut first = Session::open(id.clone(), "owner", ConversationType::Coach);
    let stale = first.clone();

    first.append(Role::User, "one", None);
    first.append(Role::Assistant, "two", None);
    store.save_session(&first).await.unwrap();

    store.save_session(&stale).await.unwrap();
    let loaded = store.find_session(&id).await.unwrap().unwrap();
    assert_eq!(loaded.messages().len(), 2);
}

#[tokio::test]
async fn test_contexts_share_the_same_data() {
    let persistence = InMemoryPersistence::new();
    let a = persistence.open_context().await.unwrap();
    let b = persistence.open_context().await.unwrap();

    let run = Run::new("lesson", json!({}), ExecutionMode::Sync, 1);
    a.runs.insert_run(&run).await.unwrap();
    assert!(b.runs.find_run(run.id()).await.unwrap().is_some());
}
