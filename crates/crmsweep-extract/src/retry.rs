//! Bounded retry with exponential backoff for single network calls.

use std::future::Future;
use std::time::Duration;

use crmsweep_core::CapabilityError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Why a retried call gave up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Authentication/permission failure; never retried.
    #[error("{0}")]
    Fatal(CapabilityError),

    #[error("{last} (after {attempts} attempts)")]
    Failed { attempts: u32, last: CapabilityError },

    #[error("cancelled")]
    Cancelled,
}

/// Run `op` until it succeeds, fails non-transiently, runs out of retries, or
/// `cancel` fires. Cancellation also aborts an in-flight attempt.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut attempt = 0u32;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            outcome = op() => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_fatal() => return Err(CallError::Fatal(err)),
            Err(err) if !err.is_transient() || attempt >= policy.max_retries => {
                return Err(CallError::Failed {
                    attempts: attempt + 1,
                    last: err,
                });
            }
            Err(err) => err,
        };

        let mut delay = policy.delay_for(attempt);
        if let CapabilityError::RateLimited {
            retry_after: Some(after),
        } = &err
        {
            delay = delay.max(*after);
        }
        attempt += 1;
        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient failure, backing off");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
