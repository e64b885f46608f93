//! Bounded retry with backoff.
//!
//! ```text
//! attempt 1 ──fail(retryable)──▶ sleep delay(2) ──▶ attempt 2 ──▶ ...
//!     │                                                  │
//!     └──fail(permanent)──▶ Err                          └── attempt N fails ──▶ Err
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff schedule without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay slept before 1-based `attempt`. Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(400))
    }
}

/// Run `operation` until it succeeds, fails permanently, or `max_attempts`
/// is used up. The last error is returned.
///
/// `operation` receives the 1-based attempt number. `delay` maps the number
/// of the attempt about to start to the sleep preceding it.
pub async fn retry_with_backoff<T, E, Op, Fut, D, P>(
    max_attempts: u32,
    delay: D,
    is_retryable: P,
    mut operation: Op,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    D: Fn(u32) -> Duration,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                let next = attempt + 1;
                let backoff = delay(next);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient error, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt = next;
            }
        }
    }
}
