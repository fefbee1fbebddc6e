use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(8_000),
        }
    }
}

impl BackoffPolicy {
    /// Delay before `attempt` (zero-based): none for the first attempt, then
    /// `base * 2^(attempt - 1)` capped at `max`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 1u64 << (attempt - 1).min(16);
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(base_ms.saturating_mul(multiplier).min(max_ms))
    }
}

/// Runs `operation` up to `max_retries + 1` times.
///
/// Errors rejected by `should_retry`, and the error of the final attempt, are
/// returned unchanged.
pub async fn retry_with_backoff<T, E, Op, Fut, Retry>(
    policy: BackoffPolicy,
    max_retries: u32,
    mut operation: Op,
    should_retry: Retry,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Retry: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries && should_retry(&err) => {
                attempt += 1;
                let delay = policy.delay_before(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying upstream call after failure"
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
