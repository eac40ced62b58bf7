use lectern_core::{
    AssessmentQuestion, CallId, ConversationId, ConversationType, LedgerAttachment,
    LedgerEntryBuilder, LedgerStatus, Role, Session, StepRunId, TokenUsage,
};
use serde_json::json;

#[test]
fn test_ledger_entry_defaults_to_first_attempt() {
    let step_run_id = StepRunId::new();
    let entry = LedgerEntryBuilder::default()
        .call_id(CallId::new())
        .attachment(LedgerAttachment::StepRun(step_run_id))
        .provider("scripted")
        .model("fast-model")
        .usage(TokenUsage::new(5, 5))
        .status(LedgerStatus::Succeeded)
        .build()
        .unwrap();

    assert_eq!(*entry.retry_attempt(), 1);
    assert_eq!(*entry.step_run_id(), Some(step_run_id));
    assert_eq!(entry.attachment(), LedgerAttachment::StepRun(step_run_id));
    assert!(!entry.cached());
}

#[test]
fn test_ledger_entry_rejects_zero_attempt_and_negative_cost() {
    let zero = LedgerEntryBuilder::default()
        .call_id(CallId::new())
        .provider("scripted")
        .model("m")
        .status(LedgerStatus::Failed)
        .retry_attempt(0u32)
        .build();
    assert!(zero.is_err());

    let negative = LedgerEntryBuilder::default()
        .call_id(CallId::new())
        .provider("scripted")
        .model("m")
        .status(LedgerStatus::Failed)
        .cost_estimate(-1.0)
        .build();
    assert!(negative.is_err());
}

#[test]
fn test_conversation_attachment_is_recorded() {
    let entry = LedgerEntryBuilder::default()
        .call_id(CallId::new())
        .attachment(LedgerAttachment::Conversation(ConversationId::from("c-1")))
        .provider("scripted")
        .model("m")
        .status(LedgerStatus::Succeeded)
        .build()
        .unwrap();

    assert!(entry.step_run_id().is_none());
    assert_eq!(entry.conversation_id().as_ref().map(|c| c.as_str()), Some("c-1"));
}

#[test]
fn test_session_messages_are_sequenced() {
    let mut session = Session::open(ConversationId::from("c-1"), "learner-1", ConversationType::Coach);
    assert!(session.is_new());

    session.append(Role::Assistant, "Hi!", None);
    session.append(Role::User, "Why was I wrong?", None);
    let reply = session.append(Role::Assistant, "Let's look.", None);

    assert_eq!(reply.sequence, 2);
    assert_eq!(session.messages().len(), 3);
    assert!(session.last_message_at().is_some());
    assert_eq!(session.recent(2)[0].content, "Why was I wrong?");
    assert_eq!(session.recent(10).len(), 3);
}

#[test]
fn test_metadata_is_namespaced_by_conversation_type() {
    let mut session = Session::open(ConversationId::from("c-2"), "learner-1", ConversationType::Assistant);
    session.set_meta("intro_topic", json!("decimals"));

    assert_eq!(session.meta("intro_topic"), Some(&json!("decimals")));
    assert!(session.metadata().entries().contains_key("assistant.intro_topic"));
    assert!(session.metadata().get(ConversationType::Coach, "intro_topic").is_none());
}

#[test]
fn test_correct_label_matches_option_position() {
    let question = AssessmentQuestion {
        question_id: "q1".to_string(),
        prompt: "1/2 + 1/4 = ?".to_string(),
        options: vec!["1/6".to_string(), "3/4".to_string(), "2/6".to_string()],
        correct_answer: "3/4".to_string(),
    };
    assert_eq!(question.correct_label().as_deref(), Some("B"));
}
