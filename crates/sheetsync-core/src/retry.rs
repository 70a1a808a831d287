//! Bounded retry with exponential backoff.
//!
//! Every call that touches the remote table store goes through
//! [`RetryExecutor::run`]. Individual transient failures are absorbed here;
//! callers only ever see success or [`Error::RetryExhausted`].

use crate::config::SyncConfig;
use crate::{Error, Result, StoreError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub base_delay: Duration,

    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self::new(config.max_retries)
            .with_base_delay(Duration::from_millis(config.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(config.retry_max_delay_ms))
    }
}

/// Statistics for the retry executor.
#[derive(Debug, Default)]
pub struct RetryStats {
    /// Total attempts made
    pub attempts: AtomicU64,
    /// Attempts that were followed by another attempt
    pub retries: AtomicU64,
    /// Operations that eventually succeeded
    pub successes: AtomicU64,
    /// Operations that ran out of attempts
    pub exhausted: AtomicU64,
}

/// Wraps fallible store calls with bounded retry.
#[derive(Debug, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    stats: RetryStats,
}

impl RetryExecutor {
    /// Create a new executor.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: RetryStats::default(),
        }
    }

    /// Run `f` until it succeeds or the attempt budget is spent.
    ///
    /// Permanent failures (see [`StoreError::is_retryable`]) are returned
    /// immediately as [`Error::Store`].
    pub async fn run<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            match f().await {
                Ok(value) => {
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    if attempt > 1 {
                        info!(operation, attempts = attempt, "Succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(operation, error = %e, "Permanent failure, not retrying");
                    return Err(Error::Store(e));
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(Error::RetryExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = self.policy.backoff(attempt);
                    debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Get the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Get statistics.
    pub fn stats(&self) -> &RetryStats {
        &self.stats
    }
}
