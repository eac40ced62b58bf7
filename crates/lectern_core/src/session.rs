//! Conversation session state.

use crate::{ConversationId, LedgerEntryId, Role};
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Kind of conversation a session belongs to.
///
/// The kind also namespaces session metadata so one kind never reads
/// another kind's keys.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
pub enum ConversationType {
    /// Lesson coach that explains mistakes and suggests next steps
    #[default]
    Coach,
    /// General course assistant
    Assistant,
}

/// One message stored in a session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Zero-based position in the transcript
    pub sequence: u32,
    /// Author
    pub role: Role,
    /// Text content
    pub content: String,
    /// Ledger entry of the model call that produced this message
    pub ledger_entry_id: Option<LedgerEntryId>,
    /// Append time
    pub created_at: DateTime<Utc>,
}

/// Session metadata keyed by `<conversation type>.<key>`.
///
/// # Examples
///
/// ```
/// use lectern_core::{ConversationType, SessionMetadata};
///
/// let mut metadata = SessionMetadata::default();
/// metadata.set(ConversationType::Coach, "intro_topic", "fractions".into());
///
/// assert!(metadata.get(ConversationType::Coach, "intro_topic").is_some());
/// assert!(metadata.get(ConversationType::Assistant, "intro_topic").is_none());
/// assert!(metadata.entries().contains_key("coach.intro_topic"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionMetadata(BTreeMap<String, Value>);

impl SessionMetadata {
    fn key(namespace: ConversationType, key: &str) -> String {
        format!("{}.{}", namespace, key)
    }

    /// Restore metadata from stored, already namespaced entries.
    pub fn from_entries(entries: BTreeMap<String, Value>) -> Self {
        Self(entries)
    }

    /// Read a key in a namespace.
    pub fn get(&self, namespace: ConversationType, key: &str) -> Option<&Value> {
        self.0.get(&Self::key(namespace, key))
    }

    /// Write a key in a namespace.
    pub fn set(&mut self, namespace: ConversationType, key: &str, value: Value) {
        self.0.insert(Self::key(namespace, key), value);
    }

    /// Every stored entry, keys fully qualified.
    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

/// Persistent state of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct Session {
    conversation_id: ConversationId,
    owner_id: String,
    conversation_type: ConversationType,
    messages: Vec<SessionMessage>,
    metadata: SessionMetadata,
    created_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A new empty session.
    pub fn open(
        conversation_id: ConversationId,
        owner_id: impl Into<String>,
        conversation_type: ConversationType,
    ) -> Self {
        Self {
            conversation_id,
            owner_id: owner_id.into(),
            conversation_type,
            messages: Vec::new(),
            metadata: SessionMetadata::default(),
            created_at: Utc::now(),
            last_message_at: None,
        }
    }

    /// Rebuild a session from stored parts.
    ///
    /// Messages are sorted by sequence.
    pub fn restore(
        conversation_id: ConversationId,
        owner_id: impl Into<String>,
        conversation_type: ConversationType,
        mut messages: Vec<SessionMessage>,
        metadata: SessionMetadata,
        created_at: DateTime<Utc>,
    ) -> Self {
        messages.sort_by_key(|m| m.sequence);
        let last_message_at = messages.last().map(|m| m.created_at);
        Self {
            conversation_id,
            owner_id: owner_id.into(),
            conversation_type,
            messages,
            metadata,
            created_at,
            last_message_at,
        }
    }

    /// True until the first message is appended.
    pub fn is_new(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message at the next sequence position.
    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
        ledger_entry_id: Option<LedgerEntryId>,
    ) -> &SessionMessage {
        let now = Utc::now();
        let sequence = self.messages.len() as u32;
        self.messages.push(SessionMessage {
            sequence,
            role,
            content: content.into(),
            ledger_entry_id,
            created_at: now,
        });
        self.last_message_at = Some(now);
        &self.messages[self.messages.len() - 1]
    }

    /// The last `window` messages, oldest first.
    pub fn recent(&self, window: usize) -> &[SessionMessage] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    /// Read metadata in this session's namespace.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(self.conversation_type, key)
    }

    /// Write metadata in this session's namespace.
    pub fn set_meta(&mut self, key: &str, value: Value) {
        self.metadata.set(self.conversation_type, key, value);
    }
}
