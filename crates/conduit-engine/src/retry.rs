//! Bounded exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use crate::error::Transient;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Retry schedule applied to claim store calls and channel publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The last error is returned unchanged; callers that care whether the
    /// budget was exhausted check [`Transient::is_transient`] on it.
    ///
    /// # Errors
    ///
    /// Returns the error from the final attempt.
    pub async fn retry_async<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    #[allow(clippy::cast_possible_truncation)]
                    let delay_ms = delay.as_millis() as u64;
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms,
                        error = %err,
                        "Transient failure, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::error!(operation, attempt, error = %err, "Retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}
