//! Retry classification shared by error types.

/// Trait for errors that support retry logic.
///
/// Transient errors like timeouts, 503 (service unavailable), 429 (rate limit)
/// or schema-violating structured output should return true. Permanent errors
/// like 401 (unauthorized) or configuration problems should return false.
pub trait RetryableError {
    /// Returns true if this error should trigger a retry.
    fn is_retryable(&self) -> bool;

    /// Get retry strategy parameters for this error.
    ///
    /// Returns `(initial_backoff_ms, max_retries, max_delay_secs)`.
    fn retry_strategy_params(&self) -> (u64, usize, u64) {
        (2000, 5, 60)
    }
}
