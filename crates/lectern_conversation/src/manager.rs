//! The conversation session manager.

use crate::context::ContextAssembler;
use crate::intro::{Introduction, synthesize_introduction};
use crate::locks::ConversationLocks;
use crate::quick_replies::QuickReplyComposer;
use crate::step::{ConversationStep, ReplyInputs, ReplyOutput};
use lectern_core::{
    AssessmentQuestion, ConversationId, ConversationType, LedgerAttachment, Message, Role,
    Session, SessionMessage,
};
use lectern_error::{LecternResult, SessionError, SessionErrorKind, StepError};
use lectern_flow::StepExecutor;
use lectern_interface::PersistenceProvider;
use lectern_rate_limit::ConversationConfig;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const INTRO_TOPIC_KEY: &str = "intro.guessed_topic";
const INTRO_CONFIDENCE_KEY: &str = "intro.confidence";
const ATTACHED_RESOURCES_KEY: &str = "attached_resources";

/// One learner turn.
#[derive(Debug, Clone, PartialEq, derive_builder::Builder)]
#[builder(setter(into))]
pub struct TurnRequest {
    /// Conversation to advance
    pub conversation_id: ConversationId,
    /// Learner submitting the turn
    pub owner_id: String,
    /// Kind of conversation
    #[builder(default)]
    pub conversation_type: ConversationType,
    /// Turn text
    pub content: String,
    /// Lesson the learner is studying
    #[builder(default)]
    pub lesson_id: Option<String>,
    /// Assessment question under discussion
    #[builder(default)]
    pub active_question: Option<AssessmentQuestion>,
    /// Resources attached with this turn
    #[builder(default)]
    pub attached_resource_ids: Vec<String>,
}

/// Result of advancing a conversation.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The assistant replied.
    Replied {
        /// Session after the turn
        session: Session,
        /// Assistant reply
        reply: String,
        /// Suggested next turns
        quick_replies: Vec<String>,
        /// Greeting synthesized because the session was new
        introduction: Option<Introduction>,
    },
    /// The learner's turn was saved but no reply could be produced.
    Unanswered {
        /// Session after the turn, ending with the learner's message
        session: Session,
        /// Why the reply failed
        reason: StepError,
    },
}

impl TurnOutcome {
    /// Session after the turn.
    pub fn session(&self) -> &Session {
        match self {
            TurnOutcome::Replied { session, .. } | TurnOutcome::Unanswered { session, .. } => {
                session
            }
        }
    }

    /// The reply, if one was produced.
    pub fn reply(&self) -> Option<&str> {
        match self {
            TurnOutcome::Replied { reply, .. } => Some(reply),
            TurnOutcome::Unanswered { .. } => None,
        }
    }
}

/// Advances conversations one turn at a time.
///
/// Each turn loads or creates the session, appends the learner's message,
/// gathers learner context, makes one model call through the
/// [`StepExecutor`] and saves the session. Turns for one conversation are
/// serialized, so a turn always sees every message saved before it.
pub struct SessionManager {
    executor: Arc<StepExecutor>,
    persistence: Arc<dyn PersistenceProvider>,
    context: ContextAssembler,
    config: ConversationConfig,
    composer: QuickReplyComposer,
    locks: ConversationLocks,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Assemble a session manager.
    pub fn new(
        executor: Arc<StepExecutor>,
        persistence: Arc<dyn PersistenceProvider>,
        context: ContextAssembler,
        config: ConversationConfig,
    ) -> Self {
        let composer = QuickReplyComposer::new(config.min_quick_replies, config.max_quick_replies);
        Self {
            executor,
            persistence,
            context,
            config,
            composer,
            locks: ConversationLocks::new(),
        }
    }

    /// Load a session.
    pub async fn get_session(&self, id: &ConversationId) -> LecternResult<Option<Session>> {
        let context = self.persistence.open_context().await?;
        Ok(context.sessions.find_session(id).await?)
    }

    /// Every message of a session, in order.
    pub async fn transcript(&self, id: &ConversationId) -> LecternResult<Vec<SessionMessage>> {
        let session = self.get_session(id).await?.ok_or_else(|| {
            SessionError::new(SessionErrorKind::NotFound(id.to_string()))
        })?;
        Ok(session.messages().clone())
    }

    /// Advance a conversation by one learner turn.
    ///
    /// Invalid turns are rejected before anything is saved. A failed model
    /// call leaves the learner's turn saved and returns
    /// [`TurnOutcome::Unanswered`]. When learner context cannot be loaded
    /// the turn is saved as well, a new session gets the generic greeting,
    /// and the context error is returned.
    #[instrument(
        skip(self, request),
        fields(conversation_id = %request.conversation_id, kind = %request.conversation_type)
    )]
    pub async fn advance(&self, request: TurnRequest) -> LecternResult<TurnOutcome> {
        let id = request.conversation_id.clone();
        if request.content.trim().is_empty() {
            return Err(SessionError::new(SessionErrorKind::EmptyTurn(id.to_string())).into());
        }

        let _turn = self.locks.lock(&id).await;
        let store = self.persistence.open_context().await?;

        let mut session = match store.sessions.find_session(&id).await? {
            Some(session) => {
                check_turn(&session, &request)?;
                session
            }
            None => {
                debug!("Opening new session");
                Session::open(id.clone(), request.owner_id.clone(), request.conversation_type)
            }
        };

        let context = self
            .context
            .assemble(
                &request.owner_id,
                request.lesson_id.as_deref(),
                &request.attached_resource_ids,
                request.active_question.clone(),
            )
            .await;

        let introduction = if session.is_new() {
            let known = context.as_ref().ok();
            let intro = synthesize_introduction(
                known.and_then(|c| c.lesson.as_ref()),
                known.and_then(|c| c.progress.as_ref()),
                self.config.intro_confidence_threshold,
            );
            session.append(Role::Assistant, intro.text.clone(), None);
            session.set_meta(
                INTRO_TOPIC_KEY,
                intro
                    .guess
                    .as_ref()
                    .map(|g| Value::from(g.topic.clone()))
                    .unwrap_or(Value::Null),
            );
            session.set_meta(
                INTRO_CONFIDENCE_KEY,
                json!(intro.guess.as_ref().map(|g| g.confidence).unwrap_or(0.0)),
            );
            info!(names_topic = intro.names_topic, "Synthesized introduction");
            Some(intro)
        } else {
            None
        };

        session.append(Role::User, request.content.trim(), None);
        merge_resources(&mut session, &request.attached_resource_ids);

        // The learner's turn is kept even when its context is unavailable.
        let context = match context {
            Ok(context) => context,
            Err(e) => {
                store.sessions.save_session(&session).await?;
                warn!(error = %e.kind, "Learner context unavailable; turn saved without a reply");
                return Err(e.into());
            }
        };

        let inputs = ReplyInputs {
            system: context.system_prompt(request.conversation_type),
            history: session
                .recent(self.config.history_window.max(1))
                .iter()
                .filter_map(|m| match m.role {
                    Role::User => Some(Message::user(m.content.clone())),
                    Role::Assistant => Some(Message::assistant(m.content.clone())),
                    Role::System => None,
                })
                .collect(),
        };
        let step = ConversationStep::new(request.conversation_type, self.config.tier);
        let result = self
            .executor
            .execute_typed::<ReplyInputs, ReplyOutput>(
                &step,
                &inputs,
                LedgerAttachment::Conversation(id.clone()),
                store.ledger.as_ref(),
            )
            .await;

        match result {
            Ok((output, outcome)) => {
                let ledger_entry_id = outcome.ledger_entry_ids.last().copied();
                session.append(Role::Assistant, output.reply.clone(), ledger_entry_id);
                let quick_replies = self.composer.compose(
                    request.conversation_type,
                    &output.quick_replies,
                    request.active_question.as_ref(),
                );
                store.sessions.save_session(&session).await?;
                info!(
                    messages = session.messages().len(),
                    quick_replies = quick_replies.len(),
                    "Turn answered"
                );
                Ok(TurnOutcome::Replied {
                    session,
                    reply: output.reply,
                    quick_replies,
                    introduction,
                })
            }
            Err(reason) => {
                store.sessions.save_session(&session).await?;
                warn!(error = %reason.kind, "Turn saved without a reply");
                Ok(TurnOutcome::Unanswered { session, reason })
            }
        }
    }
}

fn check_turn(session: &Session, request: &TurnRequest) -> Result<(), SessionError> {
    if session.owner_id() != &request.owner_id {
        return Err(SessionError::new(SessionErrorKind::OwnerMismatch(
            request.conversation_id.to_string(),
        )));
    }
    if *session.conversation_type() != request.conversation_type {
        return Err(SessionError::new(SessionErrorKind::TypeMismatch {
            conversation_id: request.conversation_id.to_string(),
            expected: session.conversation_type().to_string(),
            actual: request.conversation_type.to_string(),
        }));
    }
    Ok(())
}

fn merge_resources(session: &mut Session, resource_ids: &[String]) {
    if resource_ids.is_empty() {
        return;
    }
    let mut attached: Vec<String> = session
        .meta(ATTACHED_RESOURCES_KEY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    for id in resource_ids {
        if !attached.contains(id) {
            attached.push(id.clone());
        }
    }
    session.set_meta(ATTACHED_RESOURCES_KEY, json!(attached));
}
