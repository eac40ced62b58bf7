//! Top-level error wrapper types.

#[cfg(feature = "database")]
use crate::DatabaseError;
use crate::{
    BackendError, ConfigError, FlowError, JsonError, ModelError, SessionError, StepError,
    StorageError,
};

/// Every error condition a Lectern crate can report.
///
/// # Examples
///
/// ```
/// use lectern_error::{FlowError, FlowErrorKind, LecternError};
///
/// let flow_err = FlowError::new(FlowErrorKind::UnknownFlow("lesson_pack".into()));
/// let err: LecternError = flow_err.into();
/// assert!(format!("{}", err).contains("lesson_pack"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum LecternErrorKind {
    /// JSON serialization/deserialization error
    #[from(JsonError)]
    Json(JsonError),
    /// Generic backend error
    #[from(BackendError)]
    Backend(BackendError),
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Model client error
    #[from(ModelError)]
    Model(ModelError),
    /// Step execution error
    #[from(StepError)]
    Step(StepError),
    /// Flow definition or execution error
    #[from(FlowError)]
    Flow(FlowError),
    /// Conversation session error
    #[from(SessionError)]
    Session(SessionError),
    /// Storage error
    #[from(StorageError)]
    Storage(StorageError),
    /// Database error
    #[cfg(feature = "database")]
    #[from(DatabaseError)]
    Database(DatabaseError),
}

/// Lectern error with kind discrimination.
///
/// # Examples
///
/// ```
/// use lectern_error::{LecternErrorKind, LecternResult, ConfigError};
///
/// fn might_fail() -> LecternResult<()> {
///     Err(ConfigError::new("Missing field"))?
/// }
///
/// let err = might_fail().unwrap_err();
/// assert!(matches!(err.kind(), LecternErrorKind::Config(_)));
/// ```
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Lectern Error: {}", _0)]
pub struct LecternError(Box<LecternErrorKind>);

impl LecternError {
    /// Create a new error from a kind.
    pub fn new(kind: LecternErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &LecternErrorKind {
        &self.0
    }

    /// Consume the error and return its kind.
    pub fn into_kind(self) -> LecternErrorKind {
        *self.0
    }
}

// Generic From implementation for any type that converts to LecternErrorKind
impl<T> From<T> for LecternError
where
    T: Into<LecternErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Lectern operations.
pub type LecternResult<T> = std::result::Result<T, LecternError>;
