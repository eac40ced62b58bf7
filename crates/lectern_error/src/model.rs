//! Model client error types and retry classification.

use crate::RetryableError;

/// Error conditions reported by a model client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ModelErrorKind {
    /// The call did not finish within its timeout
    #[display("Model call timed out after {}ms", _0)]
    Timeout(u64),
    /// The provider rejected the call because of rate limits
    #[display("Rate limited: {}", _0)]
    RateLimited(String),
    /// The provider answered but the structured output was unusable
    #[display("Malformed structured output: {}", _0)]
    MalformedOutput(String),
    /// Provider-side failure with HTTP status code
    #[display("Provider returned HTTP {}: {}", status, message)]
    Server {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },
    /// Request was rejected as invalid
    #[display("Invalid model request: {}", _0)]
    Request(String),
    /// Authentication or authorization failure
    #[display("Authentication failed: {}", _0)]
    Auth(String),
    /// Client configuration error (unknown model, missing key, ...)
    #[display("Model client misconfigured: {}", _0)]
    Config(String),
}

impl ModelErrorKind {
    /// Check if this error should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelErrorKind::Timeout(_)
            | ModelErrorKind::RateLimited(_)
            | ModelErrorKind::MalformedOutput(_) => true,
            ModelErrorKind::Server { status, .. } => {
                matches!(*status, 408 | 409 | 429 | 500 | 502 | 503 | 504)
            }
            ModelErrorKind::Request(_) | ModelErrorKind::Auth(_) | ModelErrorKind::Config(_) => {
                false
            }
        }
    }

    /// Get retry strategy parameters for this error type.
    ///
    /// Returns `(initial_backoff_ms, max_retries, max_delay_secs)`.
    pub fn retry_strategy_params(&self) -> (u64, usize, u64) {
        match self {
            ModelErrorKind::RateLimited(_) => (5000, 3, 40),
            ModelErrorKind::Server { status, .. } => match *status {
                429 => (5000, 3, 40),
                503 => (2000, 5, 60),
                500 | 502 | 504 => (1000, 3, 8),
                _ => (2000, 4, 30),
            },
            ModelErrorKind::Timeout(_) => (2000, 4, 30),
            ModelErrorKind::MalformedOutput(_) => (500, 3, 5),
            _ => (2000, 5, 60),
        }
    }
}

/// Model client error with source location tracking.
///
/// # Examples
///
/// ```
/// use lectern_error::{ModelError, ModelErrorKind, RetryableError};
///
/// let err = ModelError::new(ModelErrorKind::Timeout(30_000));
/// assert!(err.is_retryable());
///
/// let err = ModelError::new(ModelErrorKind::Auth("bad key".to_string()));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Model Error: {} at line {} in {}", kind, line, file)]
pub struct ModelError {
    /// The kind of error that occurred
    pub kind: ModelErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ModelError {
    /// Create a new ModelError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ModelErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}

impl RetryableError for ModelError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    fn retry_strategy_params(&self) -> (u64, usize, u64) {
        self.kind.retry_strategy_params()
    }
}
