//! Exponential backoff for calls to external collaborators.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let shift = attempt.min(20) - 1;
        let exp = base_ms.saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX));
        Duration::from_millis(exp.min(max_ms))
    }
}

/// Outcome of [`retry_with_backoff`]: the last result and how many attempts ran.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: T,
    pub attempts: u32,
}

/// Run `op` up to `retries + 1` times, sleeping between attempts while the
/// error is retryable.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    retries: u32,
    backoff: Backoff,
    is_retryable: R,
    mut op: F,
) -> Attempted<Result<T, E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Attempted { result: Ok(v), attempts: attempt },
            Err(e) if attempt <= retries && is_retryable(&e) => {
                let delay = backoff.delay(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying after failure");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Attempted { result: Err(e), attempts: attempt },
        }
    }
}
