//! Exponential backoff with jitter for provider calls.
//! delay(attempt) = base * 2^attempt + U(0, 250ms), max_retries extra attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::TranslateError;

/// Upper bound (exclusive) of the random jitter added to each backoff.
const MAX_JITTER_MS: u64 = 250;

/// Longest wait a server `Retry-After` hint can impose on one retry.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    /// Backoff before retry number `attempt + 1` (attempt is 0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let expo = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
        Duration::from_millis(expo.saturating_add(jitter))
    }

    /// Delay for a failed attempt; a 429 `Retry-After` hint extends it, up to
    /// `MAX_RETRY_AFTER`.
    fn delay_for(&self, attempt: u32, error: &TranslateError) -> Duration {
        let backoff = self.backoff_delay(attempt);
        match error {
            TranslateError::RateLimited {
                retry_after_ms: Some(ms),
            } => backoff.max(Duration::from_millis(*ms).min(MAX_RETRY_AFTER)),
            _ => backoff,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the retry
/// budget is spent. `op` receives the 0-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, TranslateError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TranslateError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                let wait = policy.delay_for(attempt, &e);
                warn!(
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
