//! In-attempt retry for `fetch_records`.
//!
//! Only retryable [`SyncError`]s (transient failures and throttling) are retried. The delay before
//! retry `n` is `base_delay * n`, raised to the provider's `retry_after` hint when that is longer.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tokio::time::sleep;
use tracing::warn;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn delay_for(&self, retry: u32, error: &SyncError) -> Duration {
        let computed = self.base_delay.saturating_mul(retry);
        match error.retry_after_secs().map(Duration::from_secs) {
            Some(hint) if hint > computed => hint,
            _ => computed,
        }
    }
}

/// A retry that is about to sleep.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// 1-based retry number.
    pub retry: u32,
    pub delay: Duration,
    pub error: SyncError,
}

/// Runs `operation` until it succeeds, fails with a non-retryable error or runs out of attempts.
/// `on_retry` sees every delay before it is slept.
pub async fn with_retry<T, F, Fut, H>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: H,
) -> Result<T, SyncError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
    H: FnMut(&RetryEvent),
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < policy.max_attempts => {
                let event = RetryEvent {
                    retry: attempt,
                    delay: policy.delay_for(attempt, &error),
                    error,
                };
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = event.delay.as_millis() as u64,
                    error = %event.error,
                    "Retryable fetch failure, backing off"
                );
                counter!("fetch_retries_total", "kind" => event.error.kind_label()).increment(1);
                on_retry(&event);
                sleep(event.delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
