//! Retry policy for model calls.

use crate::RetryConfig;
use std::time::Duration;
use tokio_retry2::strategy::{ExponentialFactorBackoff, jitter};

/// Attempt budget, backoff schedule and per-call timeout of a step.
///
/// # Example
///
/// ```
/// use lectern_rate_limit::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, 1, 5, Duration::from_secs(1));
/// // Three attempts means two backoff delays.
/// assert_eq!(policy.backoff().count(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    call_timeout: Duration,
}

impl RetryPolicy {
    /// A policy with an explicit budget; `max_attempts` is at least 1.
    pub fn new(
        max_attempts: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff_ms: initial_backoff_ms.max(1),
            max_backoff_ms: max_backoff_ms.max(initial_backoff_ms.max(1)),
            call_timeout,
        }
    }

    /// Attempts per logical call, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Timeout applied to each attempt.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Delays between attempts.
    ///
    /// The n-th delay is `initial_backoff_ms * 2^n`, jittered by 0.5x to 1.5x
    /// and never above `max_backoff_ms`. Yields `max_attempts - 1` delays.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> + use<> {
        let max = Duration::from_millis(self.max_backoff_ms);
        ExponentialFactorBackoff::from_millis(self.initial_backoff_ms, 2.0)
            .max_delay(max)
            .map(jitter)
            .map(move |delay| delay.min(max))
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.initial_backoff_ms,
            config.max_backoff_ms,
            Duration::from_millis(config.call_timeout_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_initial_and_respects_cap() {
        let policy = RetryPolicy::new(5, 500, 10_000, Duration::from_secs(1));
        for _ in 0..50 {
            let delays: Vec<Duration> = policy.backoff().collect();
            assert_eq!(delays.len(), 4);
            // 500, 1000, 2000, 4000 ms before jitter.
            assert!(delays[0] >= Duration::from_millis(250));
            assert!(delays[0] <= Duration::from_millis(750));
            assert!(delays[1] <= Duration::from_millis(1_500));
            assert!(delays[3] >= Duration::from_millis(2_000));
            assert!(delays.iter().all(|d| *d <= Duration::from_millis(10_000)));
        }
    }

    #[test]
    fn test_backoff_never_exceeds_cap_after_jitter() {
        let policy = RetryPolicy::new(8, 1_000, 3_000, Duration::from_secs(1));
        for _ in 0..50 {
            assert!(policy.backoff().all(|d| d <= Duration::from_millis(3_000)));
        }
    }
}
