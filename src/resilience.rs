//! The single resilient-call wrapper used for every remote store call:
//! per-attempt timeout, bounded exponential backoff, cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::remote::types::RemoteError;

/// Retry/timeout settings for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1).
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Deadline for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Why a resilient call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Terminal remote failure (non-retryable, or attempts exhausted).
    Remote(RemoteError),
    /// The owning token was cancelled; any result was discarded.
    Cancelled,
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn once(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            timeout,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails terminally, runs out of attempts,
    /// or `token` is cancelled.
    ///
    /// A timed-out attempt is dropped; if it would have completed later its
    /// result is never observed. A result that arrives after cancellation is
    /// discarded as `CallError::Cancelled`.
    pub async fn run<T, F, Fut>(
        &self,
        token: &CancellationToken,
        label: &str,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if token.is_cancelled() {
                return Err(CallError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CallError::Cancelled),
                result = tokio::time::timeout(self.timeout, op()) => result,
            };

            let err = match outcome {
                Ok(Ok(value)) => {
                    if token.is_cancelled() {
                        return Err(CallError::Cancelled);
                    }
                    return Ok(value);
                }
                Ok(Err(err)) => err,
                Err(_) => RemoteError::timeout(format!(
                    "{label} timed out after {}ms",
                    self.timeout.as_millis()
                )),
            };

            if !err.is_retryable() || attempt >= max_attempts {
                if err.is_retryable() {
                    tracing::warn!(call = label, attempt, "giving up: {err}");
                }
                return Err(CallError::Remote(err));
            }

            let delay = self.backoff_for(attempt);
            tracing::debug!(
                call = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient failure: {err}"
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CallError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
