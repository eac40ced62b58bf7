//! Conversation session error types.

/// Specific error conditions for conversation sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum SessionErrorKind {
    /// Turn content is empty or whitespace
    #[display("Turn for conversation {} is empty", _0)]
    EmptyTurn(String),
    /// Turn submitted by someone other than the session owner
    #[display("Conversation {} belongs to another owner", _0)]
    OwnerMismatch(String),
    /// Turn submitted with a different conversation type than the session
    #[display("Conversation {} is a {} session, not {}", conversation_id, expected, actual)]
    TypeMismatch {
        /// Conversation id
        conversation_id: String,
        /// Type stored on the session
        expected: String,
        /// Type on the turn
        actual: String,
    },
    /// Session does not exist
    #[display("Conversation not found: {}", _0)]
    NotFound(String),
}

/// Error type for session operations.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Session Error: {} at line {} in {}", kind, line, file)]
pub struct SessionError {
    /// The specific error condition
    pub kind: SessionErrorKind,
    /// Line number where the error occurred
    pub line: u32,
    /// Source file where the error occurred
    pub file: &'static str,
}

impl SessionError {
    /// Create a new SessionError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: SessionErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
