//! Bounded exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ProviderError;

/// Default number of attempts per provider call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay before the first retry in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default cap on a single retry delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 20_000;

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
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
    /// A policy that retries without waiting.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retries_used + 1`.
    #[must_use]
    pub fn backoff(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let multiplier = 1u128 << retries_used.min(20);
        let millis = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Delay after `error`. A server-provided `retry_after` replaces the
    /// backoff but is still capped by `max_delay`.
    #[must_use]
    pub fn delay_for(&self, error: &ProviderError, retries_used: u32) -> Duration {
        error.retry_after_secs().map_or_else(
            || self.backoff(retries_used),
            |secs| Duration::from_secs(secs).min(self.max_delay),
        )
    }

    /// Runs `call` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires. Returns the result and the number of attempts made.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> (Result<T, ProviderError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match call().await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= max_attempts || cancel.is_cancelled() {
                return (Err(error), attempt);
            }

            let delay = self.delay_for(&error, attempt - 1);
            warn!(
                "{label}: {error}; retrying in {}ms (attempt {}/{max_attempts})",
                delay.as_millis(),
                attempt + 1
            );

            tokio::select! {
                () = cancel.cancelled() => return (Err(error), attempt),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
