//! Storage error types.

/// Kinds of storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum StorageErrorKind {
    /// Record not found
    #[display("{} not found: {}", entity, id)]
    NotFound {
        /// Record type
        entity: &'static str,
        /// Record id
        id: String,
    },
    /// Record already exists
    #[display("{} already exists: {}", entity, id)]
    AlreadyExists {
        /// Record type
        entity: &'static str,
        /// Record id
        id: String,
    },
    /// Attempt to rewrite an immutable record
    #[display("{} is immutable: {}", entity, id)]
    Immutable {
        /// Record type
        entity: &'static str,
        /// Record id
        id: String,
    },
    /// Storage backend is unavailable
    #[display("Storage unavailable: {}", _0)]
    Unavailable(String),
}

/// Storage error with location tracking.
///
/// # Examples
///
/// ```
/// use lectern_error::{StorageError, StorageErrorKind};
///
/// let err = StorageError::new(StorageErrorKind::NotFound {
///     entity: "run",
///     id: "42".to_string(),
/// });
/// assert!(format!("{}", err).contains("not found"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Storage Error: {} at line {} in {}", kind, line, file)]
pub struct StorageError {
    /// The kind of error that occurred
    pub kind: StorageErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl StorageError {
    /// Create a new storage error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: StorageErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
