//! Retry with exponential backoff for provider calls.
//!
//! The wait after failed attempt `n` (1-based) is
//! `multiplier * 2^(n-1)` seconds clamped to `[min, max]`. With the
//! defaults that gives 4, 4, 4, 8, 16, 32, 60, 60, ... seconds.

use std::future::Future;
use std::time::Duration;

use stepwise_core::error::ProviderError;
use tokio::sync::watch;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Base of the exponential wait, in seconds
    pub multiplier: f64,
    /// Lower bound of any wait
    pub min_wait: Duration,
    /// Upper bound of any wait
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            multiplier: 1.0,
            min_wait: Duration::from_secs(4),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.saturating_sub(1).min(62) as i32);
        let secs = (self.multiplier * exp)
            .clamp(self.min_wait.as_secs_f64(), self.max_wait.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. The last error is returned when exhausted.
///
/// `op` receives the 1-based attempt number. Raising `interrupt` during a
/// backoff wait ends the retry at once with [`ProviderError::Interrupted`].
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut interrupt: Option<watch::Receiver<bool>>,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= max_attempts {
            return Err(err);
        }

        let wait = policy.delay_for(attempt);
        warn!(
            attempt,
            max_attempts,
            wait_secs = wait.as_secs_f64(),
            error = %err,
            "Retrying model query after transient error"
        );
        match interrupt.as_mut() {
            Some(rx) => tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                Ok(_) = rx.wait_for(|interrupted| *interrupted) => {
                    return Err(ProviderError::Interrupted);
                }
            },
            None => tokio::time::sleep(wait).await,
        }
    }
}
