//! Session manager tests against the scripted model client.

use async_trait::async_trait;
use chrono::{TimeDelta, TimeZone, Utc};
use lectern_conversation::{
    ContextAssembler, SessionManager, TurnOutcome, TurnRequest, TurnRequestBuilder,
};
use lectern_core::{
    AnswerRecord, AssessmentQuestion, ConversationId, ConversationType, LearnerProgress,
    LessonMaterial, ResourceSummary, Role,
};
use lectern_error::{
    LecternErrorKind, ModelErrorKind, SessionErrorKind, StorageError, StorageErrorKind,
};
use lectern_flow::StepExecutor;
use lectern_interface::{
    LedgerStore, LessonMaterialSource, ModelClient, ModelContent, PersistenceProvider,
    ProgressSource, ResourceSummarySource,
};
use lectern_models::{MockBehavior, ScriptedModelClient};
use lectern_rate_limit::{ConversationConfig, LecternConfig, RetryPolicy};
use lectern_storage::InMemoryPersistence;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct Fixtures {
    lesson: Option<LessonMaterial>,
    progress: Option<LearnerProgress>,
    resources: Vec<ResourceSummary>,
    lesson_outage: bool,
}

#[async_trait]
impl LessonMaterialSource for Fixtures {
    async fn lesson(&self, lesson_id: &str) -> Result<Option<LessonMaterial>, StorageError> {
        if self.lesson_outage {
            return Err(StorageError::new(StorageErrorKind::Unavailable(
                "lesson service down".to_string(),
            )));
        }
        Ok(self.lesson.clone().filter(|l| l.lesson_id == lesson_id))
    }
}

#[async_trait]
impl ProgressSource for Fixtures {
    async fn progress(
        &self,
        _owner_id: &str,
        _lesson_id: &str,
    ) -> Result<Option<LearnerProgress>, StorageError> {
        Ok(self.progress.clone())
    }
}

#[async_trait]
impl ResourceSummarySource for Fixtures {
    async fn summaries(
        &self,
        resource_ids: &[String],
    ) -> Result<Vec<ResourceSummary>, StorageError> {
        Ok(self
            .resources
            .iter()
            .filter(|r| resource_ids.contains(&r.resource_id))
            .cloned()
            .collect())
    }
}

fn lesson() -> LessonMaterial {
    LessonMaterial {
        lesson_id: "fractions-101".to_string(),
        title: "Working with Fractions".to_string(),
        subject: "fractions".to_string(),
        summary: "Equivalent fractions and simplification".to_string(),
        key_points: vec!["Multiply top and bottom by the same number".to_string()],
    }
}

fn answer(topic: &str, correct: bool, minute: i64) -> AnswerRecord {
    AnswerRecord {
        exercise_id: format!("ex-{}", minute),
        topic: topic.to_string(),
        correct,
        answered_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
            + TimeDelta::minutes(minute),
    }
}

/// Three of five correct, the last one wrong on equivalent fractions.
fn struggling_progress() -> LearnerProgress {
    LearnerProgress {
        total_exercises: 5,
        answers: vec![
            answer("simplifying", true, 1),
            answer("mixed numbers", false, 2),
            answer("simplifying", true, 3),
            answer("ordering", true, 4),
            answer("equivalent fractions", false, 5),
        ],
    }
}

fn manager_with(
    client: Arc<ScriptedModelClient>,
    fixtures: Fixtures,
    config: ConversationConfig,
) -> (SessionManager, InMemoryPersistence) {
    let persistence = InMemoryPersistence::new();
    let provider: Arc<dyn PersistenceProvider> = Arc::new(persistence.clone());
    let client: Arc<dyn ModelClient> = client;
    let executor = StepExecutor::new(client, &LecternConfig::default())
        .with_retry_policy(RetryPolicy::new(2, 1, 2, Duration::from_secs(2)));
    let fixtures = Arc::new(fixtures);
    let manager = SessionManager::new(
        Arc::new(executor),
        provider,
        ContextAssembler::new(fixtures.clone(), fixtures.clone(), fixtures),
        config,
    );
    (manager, persistence)
}

fn turn(conversation_id: &str, content: &str) -> TurnRequest {
    TurnRequestBuilder::default()
        .conversation_id(conversation_id)
        .owner_id("learner-1")
        .content(content)
        .lesson_id(Some("fractions-101".to_string()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_new_session_introduction_names_confident_topic() {
    let client = Arc::new(ScriptedModelClient::new());
    let fixtures = Fixtures {
        lesson: Some(lesson()),
        progress: Some(struggling_progress()),
        ..Fixtures::default()
    };
    let (manager, persistence) = manager_with(client.clone(), fixtures, ConversationConfig::default());

    let outcome = manager
        .advance(turn("c-1", "I keep getting these wrong"))
        .await
        .unwrap();

    let TurnOutcome::Replied {
        session,
        reply,
        quick_replies,
        introduction,
    } = outcome
    else {
        panic!("Expected a reply");
    };
    let introduction = introduction.unwrap();
    assert!(introduction.names_topic);
    assert!(introduction.text.contains("equivalent fractions"));

    // Scripted echo replies with the learner's turn.
    assert_eq!(reply, "I keep getting these wrong");
    assert!((2..=4).contains(&quick_replies.len()));

    let roles: Vec<Role> = session.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(session.messages()[0].content, introduction.text);
    assert!(session.messages()[2].ledger_entry_id.is_some());

    let entries = session.metadata().entries();
    assert_eq!(
        entries.get("coach.intro.guessed_topic"),
        Some(&json!("equivalent fractions"))
    );
    assert_eq!(entries.get("coach.intro.confidence"), Some(&json!(0.75)));

    let ledger = persistence
        .ledger()
        .entries_for_conversation(&ConversationId::from("c-1"))
        .await
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(Some(*ledger[0].id()), session.messages()[2].ledger_entry_id);

    // The request carried the lesson context and the coach label.
    let requests = client.requests();
    let request = &requests[0];
    assert_eq!(request.label().as_deref(), Some("coach"));
    let system = &request.messages()[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("Working with Fractions"));
    assert!(system.content.contains("3 of 5 exercises correct"));
}

#[tokio::test]
async fn test_low_confidence_introduction_mentions_subject_only() {
    let fixtures = Fixtures {
        lesson: Some(lesson()),
        progress: Some(struggling_progress()),
        ..Fixtures::default()
    };
    let config = ConversationConfig {
        intro_confidence_threshold: 0.9,
        ..ConversationConfig::default()
    };
    let (manager, _) = manager_with(Arc::new(ScriptedModelClient::new()), fixtures, config);

    let outcome = manager.advance(turn("c-2", "Hello")).await.unwrap();
    let TurnOutcome::Replied { introduction, .. } = outcome else {
        panic!("Expected a reply");
    };
    let introduction = introduction.unwrap();
    assert!(!introduction.names_topic);
    assert!(introduction.text.contains("fractions"));
    assert!(!introduction.text.contains("equivalent fractions"));
    assert!(!introduction.text.contains("mixed numbers"));
}

#[tokio::test]
async fn test_second_turn_has_no_introduction_and_sees_history() {
    let client = Arc::new(ScriptedModelClient::new());
    let (manager, _) = manager_with(client.clone(), Fixtures::default(), ConversationConfig::default());

    manager.advance(turn("c-3", "First question")).await.unwrap();
    let outcome = manager.advance(turn("c-3", "Second question")).await.unwrap();

    let TurnOutcome::Replied { introduction, .. } = &outcome else {
        panic!("Expected a reply");
    };
    assert!(introduction.is_none());
    assert_eq!(outcome.session().messages().len(), 5);
    assert_eq!(outcome.reply(), Some("Second question"));

    // system + intro + first turn + first reply + second turn
    let requests = client.requests();
    let second = &requests[1];
    assert_eq!(second.messages().len(), 5);
    assert_eq!(second.messages()[2].content, "First question");
}

#[tokio::test]
async fn test_failed_reply_keeps_learner_turn() {
    let client = Arc::new(
        ScriptedModelClient::new().script("coach", MockBehavior::Error(ModelErrorKind::Timeout(30))),
    );
    let (manager, persistence) = manager_with(client, Fixtures::default(), ConversationConfig::default());

    let outcome = manager.advance(turn("c-4", "Are you there?")).await.unwrap();
    let TurnOutcome::Unanswered { session, reason } = outcome else {
        panic!("Expected no reply");
    };
    assert!(reason.to_string().contains("after 2 attempts"));

    let last = session.messages().last().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.content, "Are you there?");

    let stored = manager
        .get_session(&ConversationId::from("c-4"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.messages(), session.messages());

    let ledger = persistence
        .ledger()
        .entries_for_conversation(&ConversationId::from("c-4"))
        .await
        .unwrap();
    assert_eq!(ledger.len(), 2);
}

#[tokio::test]
async fn test_context_outage_keeps_learner_turn() {
    let client = Arc::new(ScriptedModelClient::new());
    let fixtures = Fixtures {
        lesson: Some(lesson()),
        progress: Some(struggling_progress()),
        lesson_outage: true,
        ..Fixtures::default()
    };
    let (manager, persistence) =
        manager_with(client.clone(), fixtures, ConversationConfig::default());

    let err = manager
        .advance(turn("c-9", "Why is 2/4 the same as 1/2?"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), LecternErrorKind::Storage(_)));

    // Generic greeting, then the learner's turn; no model call was made.
    let transcript = manager
        .transcript(&ConversationId::from("c-9"))
        .await
        .unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::Assistant);
    assert!(!transcript[0].content.contains("equivalent fractions"));
    assert_eq!(transcript[1].role, Role::User);
    assert_eq!(transcript[1].content, "Why is 2/4 the same as 1/2?");

    assert!(client.requests().is_empty());
    let ledger = persistence
        .ledger()
        .entries_for_conversation(&ConversationId::from("c-9"))
        .await
        .unwrap();
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn test_invalid_turns_are_rejected_without_changes() {
    let (manager, _) = manager_with(
        Arc::new(ScriptedModelClient::new()),
        Fixtures::default(),
        ConversationConfig::default(),
    );
    manager.advance(turn("c-5", "Hi")).await.unwrap();
    let before = manager.transcript(&ConversationId::from("c-5")).await.unwrap();

    let empty = manager.advance(turn("c-5", "   ")).await.unwrap_err();
    assert!(matches!(
        empty.kind(),
        LecternErrorKind::Session(e) if matches!(e.kind, SessionErrorKind::EmptyTurn(_))
    ));

    let mut stranger = turn("c-5", "Let me in");
    stranger.owner_id = "learner-2".to_string();
    let err = manager.advance(stranger).await.unwrap_err();
    assert!(matches!(
        err.kind(),
        LecternErrorKind::Session(e) if matches!(e.kind, SessionErrorKind::OwnerMismatch(_))
    ));

    let mut retyped = turn("c-5", "Different kind");
    retyped.conversation_type = ConversationType::Assistant;
    let err = manager.advance(retyped).await.unwrap_err();
    assert!(matches!(
        err.kind(),
        LecternErrorKind::Session(e) if matches!(e.kind, SessionErrorKind::TypeMismatch { .. })
    ));

    let after = manager.transcript(&ConversationId::from("c-5")).await.unwrap();
    assert_eq!(before, after);

    let missing = manager
        .transcript(&ConversationId::from("nope"))
        .await
        .unwrap_err();
    assert!(matches!(
        missing.kind(),
        LecternErrorKind::Session(e) if matches!(e.kind, SessionErrorKind::NotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_turns_are_serialized() {
    let client = Arc::new(ScriptedModelClient::new().with_delay("coach", Duration::from_millis(40)));
    let (manager, _) = manager_with(client.clone(), Fixtures::default(), ConversationConfig::default());

    let (first, second) = tokio::join!(
        manager.advance(turn("c-6", "Turn one")),
        manager.advance(turn("c-6", "Turn two")),
    );
    first.unwrap();
    second.unwrap();

    let transcript = manager.transcript(&ConversationId::from("c-6")).await.unwrap();
    // Intro, then two complete exchanges; neither turn is lost.
    assert_eq!(transcript.len(), 5);
    let sequences: Vec<u32> = transcript.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    let user_turns: Vec<&str> = transcript
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(user_turns.len(), 2);
    assert!(user_turns.contains(&"Turn one"));
    assert!(user_turns.contains(&"Turn two"));

    // Only the first turn saw a brand-new session.
    let intros = transcript
        .iter()
        .filter(|m| m.role == Role::Assistant && m.ledger_entry_id.is_none())
        .count();
    assert_eq!(intros, 1);

    // The later turn's request included the earlier exchange.
    let requests = client.requests();
    let later = &requests[1];
    assert_eq!(later.messages().len(), 5);
}

#[tokio::test]
async fn test_quick_replies_never_leak_the_answer() {
    let client = Arc::new(ScriptedModelClient::new().script(
        "coach",
        MockBehavior::Reply(ModelContent::Json(json!({
            "reply": "What do you get when you halve both numbers?",
            "quick_replies": ["Is it 1/2?", "Why halve?", "why halve", "Option B", "  "]
        }))),
    ));
    let (manager, _) = manager_with(client, Fixtures::default(), ConversationConfig::default());

    let mut request = turn("c-7", "Which one equals 2/4?");
    request.active_question = Some(AssessmentQuestion {
        question_id: "q-9".to_string(),
        prompt: "Which fraction equals 2/4?".to_string(),
        options: vec!["1/3".to_string(), "1/2".to_string(), "3/4".to_string()],
        correct_answer: "1/2".to_string(),
    });

    let outcome = manager.advance(request).await.unwrap();
    let TurnOutcome::Replied { quick_replies, .. } = outcome else {
        panic!("Expected a reply");
    };
    assert_eq!(quick_replies, vec!["Why halve?", "Can you give me a hint?"]);
}

#[tokio::test]
async fn test_attached_resources_are_merged_into_metadata() {
    let fixtures = Fixtures {
        resources: vec![
            ResourceSummary {
                resource_id: "r1".to_string(),
                title: "Fraction strips".to_string(),
                summary: "Visual model of equal parts".to_string(),
            },
            ResourceSummary {
                resource_id: "r2".to_string(),
                title: "Number line".to_string(),
                summary: "Fractions as positions".to_string(),
            },
        ],
        ..Fixtures::default()
    };
    let client = Arc::new(ScriptedModelClient::new());
    let (manager, _) = manager_with(client.clone(), fixtures, ConversationConfig::default());

    let mut first = turn("c-8", "Look at this");
    first.attached_resource_ids = vec!["r1".to_string()];
    manager.advance(first).await.unwrap();

    let mut second = turn("c-8", "And this");
    second.attached_resource_ids = vec!["r1".to_string(), "r2".to_string()];
    let outcome = manager.advance(second).await.unwrap();

    assert_eq!(
        outcome.session().meta("attached_resources"),
        Some(&json!(["r1", "r2"]))
    );
    let requests = client.requests();
    let system = &requests[1].messages()[0];
    assert!(system.content.contains("Number line: Fractions as positions"));
}
