//! Request ledger entries.

use crate::{CallId, ConversationId, LedgerEntryId, StepRunId, TokenUsage};
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};

/// Outcome of one model call attempt.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LedgerStatus {
    /// The provider returned a usable response
    Succeeded,
    /// The attempt failed
    Failed,
}

/// What a ledger entry is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerAttachment {
    /// A step run inside a flow
    StepRun(StepRunId),
    /// A conversation turn
    Conversation(ConversationId),
    /// A step executed outside any run
    Detached,
}

/// One external model call attempt.
///
/// Entries are append-only: a retry is recorded as a new entry sharing the
/// same [`CallId`] with an incremented `retry_attempt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, derive_builder::Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct LedgerEntry {
    /// Unique entry id
    #[builder(default)]
    id: LedgerEntryId,
    /// Logical call shared across retries
    call_id: CallId,
    /// Step run this call belongs to
    #[builder(default)]
    step_run_id: Option<StepRunId>,
    /// Conversation this call belongs to
    #[builder(default)]
    conversation_id: Option<ConversationId>,
    /// Provider name
    provider: String,
    /// Model name
    model: String,
    /// Tokens reported by the provider
    #[builder(default)]
    usage: TokenUsage,
    /// Estimated cost, never negative
    #[builder(default)]
    cost_estimate: f64,
    /// Success or failure
    status: LedgerStatus,
    /// One-based attempt number
    #[builder(default = "1")]
    retry_attempt: u32,
    /// Whether the response came from a provider cache
    #[builder(default)]
    cached: bool,
    /// Failure message
    #[builder(default)]
    error_message: Option<String>,
    /// Request start time
    #[builder(default = "Utc::now()")]
    started_at: DateTime<Utc>,
    /// Request finish time
    #[builder(default = "Utc::now()")]
    completed_at: DateTime<Utc>,
    /// Opaque reference to the raw response, if retained
    #[builder(default)]
    response_ref: Option<String>,
}

impl LedgerEntryBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.retry_attempt == Some(0) {
            return Err("retry_attempt is one-based".to_string());
        }
        match self.cost_estimate {
            Some(cost) if cost < 0.0 || cost.is_nan() => {
                Err(format!("cost_estimate must be non-negative, got {cost}"))
            }
            _ => Ok(()),
        }
    }

    /// Attach the entry to a step run or conversation.
    pub fn attachment(&mut self, attachment: LedgerAttachment) -> &mut Self {
        match attachment {
            LedgerAttachment::StepRun(id) => {
                self.step_run_id = Some(Some(id));
            }
            LedgerAttachment::Conversation(id) => {
                self.conversation_id = Some(Some(id));
            }
            LedgerAttachment::Detached => {}
        }
        self
    }
}

impl LedgerEntry {
    /// The attachment this entry was recorded against.
    pub fn attachment(&self) -> LedgerAttachment {
        match (&self.step_run_id, &self.conversation_id) {
            (Some(id), _) => LedgerAttachment::StepRun(*id),
            (None, Some(id)) => LedgerAttachment::Conversation(id.clone()),
            (None, None) => LedgerAttachment::Detached,
        }
    }
}
