//! Bounded retry with exponential backoff and per-call timeouts

use crate::error::{Result, StrategosError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry settings for store and provider calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the first retry (default: 200ms)
    pub base_backoff: Duration,
    /// Upper bound for any single delay (default: 2s)
    pub max_backoff: Duration,
    /// Deadline for each individual attempt (default: 5s)
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, still bounded by the call timeout
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry_count` (0-based): base * 2^n, capped
    pub fn backoff_duration(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up. Each attempt is bounded by `call_timeout`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut retry_count = 0;
        loop {
            let result = with_timeout(self.call_timeout, what, op()).await;
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry_count + 1 < attempts => {
                    let delay = self.backoff_duration(retry_count);
                    warn!(
                        operation = what,
                        attempt = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => {
                    debug!(operation = what, attempts = retry_count + 1, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}

/// Bound a fallible future by `timeout`, mapping expiry to `Timeout`
pub async fn with_timeout<T, Fut>(timeout: Duration, what: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StrategosError::Timeout(format!(
            "{what} exceeded {}ms",
            timeout.as_millis()
        ))),
    }
}
