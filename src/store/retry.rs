//! Retry with bounded exponential backoff for transient store failures.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Retry budget for one store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent. Exhaustion is reported as [`StoreError::Unavailable`].
    pub async fn run<T, F, Fut>(&self, name: &'static str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= attempts => {
                    warn!(op = name, attempts, error = %err, "store retries exhausted");
                    return Err(StoreError::Unavailable {
                        op: name,
                        attempts,
                        last: err.to_string(),
                    });
                }
                Err(err) => {
                    let delay = self.backoff(attempt);
                    debug!(op = name, attempt, ?delay, error = %err, "retrying store operation");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
