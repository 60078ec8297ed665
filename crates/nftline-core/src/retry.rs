//! Retry policies for upstream API pages and store access

use std::future::Future;
use std::time::Duration;

use crate::http::STATUS_RATE_LIMITED;

/// Upper bound for [`backoff_duration`]
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff: 2^attempt * 100ms (200ms, 400ms, 800ms, ...), capped at 30s
pub fn backoff_duration(attempt: u32) -> Duration {
    let millis = 100u64.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

/// Delay applied before re-issuing a failed marketplace page request.
///
/// Rate-limited responses wait `rate_limit_delay`; every other failure waits
/// `error_delay`, which defaults to zero (retry immediately).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub rate_limit_delay: Duration,
    pub error_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_delay: Duration::from_secs(5),
            error_delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after a response with `status`; `None` means go again now
    pub fn delay_for(&self, status: u16) -> Option<Duration> {
        let delay = if status == STATUS_RATE_LIMITED {
            self.rate_limit_delay
        } else {
            self.error_delay
        };
        (!delay.is_zero()).then_some(delay)
    }

    /// Sleep for the status-specific delay, if any
    pub async fn wait(&self, status: u16) {
        if let Some(delay) = self.delay_for(status) {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry an async operation until it succeeds or fails permanently.
///
/// Retryable errors are logged and retried forever with capped exponential
/// backoff. Non-retryable errors return immediately.
pub async fn retry_forever<T, E, F, Fut>(label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                attempt = attempt.saturating_add(1);
                let delay = backoff_duration(attempt);
                log::warn!("{label}: attempt {attempt} failed: {e}, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}
