//! Flow engine error types.

/// Specific error conditions for flow definition and execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum FlowErrorKind {
    /// No flow registered under the given name
    #[display("Unknown flow: {}", _0)]
    UnknownFlow(String),
    /// Flow declares no steps
    #[display("Flow '{}' has no steps", _0)]
    EmptyFlow(String),
    /// Two stages or members share a name
    #[display("Flow '{}' declares step '{}' more than once", flow, step)]
    DuplicateStep {
        /// Flow name
        flow: String,
        /// Duplicated step name
        step: String,
    },
    /// Batch stage is malformed
    #[display("Invalid batch '{}': {}", batch, message)]
    InvalidBatch {
        /// Batch name
        batch: String,
        /// What is wrong with it
        message: String,
    },
    /// Run status transition not allowed by the lifecycle
    #[display("Invalid run transition from {} to {}", from, to)]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },
    /// Run id not found in the store
    #[display("Run not found: {}", _0)]
    RunNotFound(String),
    /// Synchronous run reached the failed state
    #[display("Run {} failed: {}", run_id, message)]
    RunFailed {
        /// Run id
        run_id: String,
        /// Captured error message
        message: String,
    },
    /// Flow definition file could not be read or parsed
    #[display("Flow definition error: {}", _0)]
    Definition(String),
    /// Run reached a terminal state that could not be persisted
    #[display("Run {} finished as {} but the record could not be saved: {}", run_id, status, message)]
    RunNotSaved {
        /// Run id
        run_id: String,
        /// Terminal status reached in memory
        status: String,
        /// Last storage error
        message: String,
    },
    /// Background task ended without reporting a terminal run
    #[display("Background task error: {}", _0)]
    BackgroundTask(String),
}

/// Error type for flow operations.
///
/// # Examples
///
/// ```
/// use lectern_error::{FlowError, FlowErrorKind};
///
/// let err = FlowError::new(FlowErrorKind::UnknownFlow("lesson".to_string()));
/// assert!(format!("{}", err).contains("lesson"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Flow Error: {} at line {} in {}", kind, line, file)]
pub struct FlowError {
    /// The specific error condition
    pub kind: FlowErrorKind,
    /// Line number where the error occurred
    pub line: u32,
    /// Source file where the error occurred
    pub file: &'static str,
}

impl FlowError {
    /// Create a new FlowError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: FlowErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
