//! Rate limiter built on governor and a Tokio semaphore.
//!
//! - Governor (GCRA) enforces RPM, TPM and RPD limits
//! - A Tokio semaphore enforces the concurrent request limit

use crate::Tier;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

const DAY: Duration = Duration::from_secs(86_400);

type DirectRateLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter that enforces every quota of a [`Tier`].
///
/// # Example
///
/// ```
/// use lectern_rate_limit::{RateLimiter, TierConfig};
/// use std::collections::HashMap;
///
/// let tier = TierConfig {
///     name: "Test".to_string(),
///     rpm: None,
///     tpm: None,
///     rpd: None,
///     max_concurrent: Some(2),
///     cost_per_million_input_tokens: None,
///     cost_per_million_output_tokens: None,
///     models: HashMap::new(),
/// };
/// let limiter = RateLimiter::new(tier);
/// assert!(limiter.try_acquire(100).is_some());
/// ```
#[derive(Clone)]
pub struct RateLimiter<T: Tier> {
    inner: T,
    rpm_limiter: Option<Arc<DirectRateLimiter>>,
    tpm_limiter: Option<Arc<DirectRateLimiter>>,
    rpd_limiter: Option<Arc<DirectRateLimiter>>,
    concurrent_semaphore: Arc<Semaphore>,
}

impl<T: Tier> std::fmt::Debug for RateLimiter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tier", &self.inner.name())
            .field(
                "available_permits",
                &self.concurrent_semaphore.available_permits(),
            )
            .finish()
    }
}

impl<T: Tier> RateLimiter<T> {
    /// Create a rate limiter enforcing every limit the tier declares.
    pub fn new(tier: T) -> Self {
        let rpm_limiter = tier.rpm().and_then(|rpm| {
            NonZeroU32::new(rpm).map(|n| Arc::new(GovernorRateLimiter::direct(Quota::per_minute(n))))
        });

        // Governor quotas are u32; larger TPM values are capped.
        let tpm_limiter = tier.tpm().and_then(|tpm| {
            NonZeroU32::new(tpm.min(u32::MAX as u64) as u32)
                .map(|n| Arc::new(GovernorRateLimiter::direct(Quota::per_minute(n))))
        });

        // Full-day burst, one request replenished every 86400 / n seconds.
        let rpd_limiter = tier.rpd().and_then(|rpd| {
            NonZeroU32::new(rpd).and_then(|n| {
                Quota::with_period(DAY / n.get())
                    .map(|quota| Arc::new(GovernorRateLimiter::direct(quota.allow_burst(n))))
            })
        });

        let max_concurrent = tier
            .max_concurrent()
            .map(|n| n.max(1) as usize)
            .unwrap_or(Semaphore::MAX_PERMITS);

        Self {
            inner: tier,
            rpm_limiter,
            tpm_limiter,
            rpd_limiter,
            concurrent_semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// The tier this limiter enforces.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Wait until every limit allows a request of `estimated_tokens`.
    ///
    /// The returned guard holds a concurrency slot until dropped.
    pub async fn acquire(&self, estimated_tokens: u64) -> RateLimiterGuard {
        if let Some(limiter) = &self.rpm_limiter {
            limiter.until_ready().await;
        }

        if let Some(limiter) = &self.tpm_limiter {
            let tokens = (estimated_tokens.min(u32::MAX as u64) as u32).max(1);
            let ready = match NonZeroU32::new(tokens) {
                Some(n) => limiter.until_n_ready(n).await.is_ok(),
                None => true,
            };
            if !ready {
                // Request exceeds the whole per-minute budget; admit it on a single cell.
                debug!(tokens, "Token estimate exceeds TPM burst, waiting for single cell");
                limiter.until_ready().await;
            }
        }

        if let Some(limiter) = &self.rpd_limiter {
            limiter.until_ready().await;
        }

        // Concurrency slot last to avoid holding it while waiting on quotas.
        let permit = self.concurrent_semaphore.clone().acquire_owned().await.ok();

        RateLimiterGuard { _permit: permit }
    }

    /// Acquire without waiting; `None` if any limit would block.
    pub fn try_acquire(&self, estimated_tokens: u64) -> Option<RateLimiterGuard> {
        if let Some(limiter) = &self.rpm_limiter {
            limiter.check().ok()?;
        }

        if let Some(limiter) = &self.tpm_limiter {
            let tokens = NonZeroU32::new((estimated_tokens.min(u32::MAX as u64) as u32).max(1))?;
            limiter.check_n(tokens).ok()?.ok()?;
        }

        if let Some(limiter) = &self.rpd_limiter {
            limiter.check().ok()?;
        }

        let permit = self.concurrent_semaphore.clone().try_acquire_owned().ok()?;
        Some(RateLimiterGuard {
            _permit: Some(permit),
        })
    }
}

/// Holds a concurrent request slot until dropped.
#[derive(Debug)]
pub struct RateLimiterGuard {
    _permit: Option<OwnedSemaphorePermit>,
}
