//! Step execution error types.

use crate::{ModelError, ModelErrorKind, RetryableError};

/// Specific failure conditions of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum StepErrorKind {
    /// Inputs did not match the declared schema; never retried
    #[display("Invalid inputs for step '{}': {}", step, message)]
    Validation {
        /// Step name
        step: String,
        /// What was wrong with the inputs
        message: String,
    },
    /// A single attempt failed in a way that may succeed on retry
    #[display("Transient failure in step '{}': {}", step, message)]
    Transient {
        /// Step name
        step: String,
        /// Failure description
        message: String,
    },
    /// Configuration or authentication failure; never retried
    #[display("Fatal failure in step '{}': {}", step, message)]
    Fatal {
        /// Step name
        step: String,
        /// Failure description
        message: String,
    },
    /// Every attempt of the retry budget failed transiently
    #[display("Step '{}' failed after {} attempts: {}", step, attempts, last_error)]
    RetriesExhausted {
        /// Step name
        step: String,
        /// Number of attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: String,
    },
}

impl StepErrorKind {
    /// Step the error belongs to.
    pub fn step(&self) -> &str {
        match self {
            StepErrorKind::Validation { step, .. }
            | StepErrorKind::Transient { step, .. }
            | StepErrorKind::Fatal { step, .. }
            | StepErrorKind::RetriesExhausted { step, .. } => step,
        }
    }
}

/// Step error with source location tracking.
///
/// # Examples
///
/// ```
/// use lectern_error::{StepError, StepErrorKind};
///
/// let err = StepError::new(StepErrorKind::Validation {
///     step: "extract".to_string(),
///     message: "missing field 'source'".to_string(),
/// });
/// assert!(format!("{}", err).contains("extract"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Step Error: {} at line {} in {}", kind, line, file)]
pub struct StepError {
    /// The kind of error that occurred
    pub kind: StepErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl StepError {
    /// Create a new StepError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: StepErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Shorthand for a validation failure.
    #[track_caller]
    pub fn validation(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Validation {
            step: step.into(),
            message: message.into(),
        })
    }

    /// Shorthand for a transient failure.
    #[track_caller]
    pub fn transient(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Transient {
            step: step.into(),
            message: message.into(),
        })
    }

    /// Shorthand for a fatal failure.
    #[track_caller]
    pub fn fatal(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Fatal {
            step: step.into(),
            message: message.into(),
        })
    }

    /// Translate a model client error into a step error.
    #[track_caller]
    pub fn from_model(step: impl Into<String>, err: &ModelError) -> Self {
        let step = step.into();
        match err.kind {
            ModelErrorKind::Request(_) | ModelErrorKind::Auth(_) | ModelErrorKind::Config(_) => {
                Self::fatal(step, err.kind.to_string())
            }
            _ if err.is_retryable() => Self::transient(step, err.kind.to_string()),
            _ => Self::fatal(step, err.kind.to_string()),
        }
    }
}

impl RetryableError for StepError {
    fn is_retryable(&self) -> bool {
        matches!(self.kind, StepErrorKind::Transient { .. })
    }
}
