//! Bounded exponential retry with jitter.
//!
//! Delay before retry `n` (1-based) is `min(cap, unit * 2^n)` plus a uniform
//! jitter in `[0, jitter_max_ms)`. Only errors that report themselves as
//! transient are retried, and cancellation always wins over a pending sleep.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// An error that knows whether another attempt may succeed.
pub trait Retryable: Sized {
    fn is_transient(&self) -> bool;

    /// The value produced when the operation is abandoned by cancellation.
    fn canceled() -> Self;
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }

    fn canceled() -> Self {
        StoreError::Canceled
    }
}

/// Retry policy parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts never exceed `max_retries + 1`.
    pub max_retries: u32,
    /// Base unit the exponential factor multiplies.
    pub unit: Duration,
    /// Upper bound on the exponential part of the delay.
    pub backoff_cap: Duration,
    /// Exclusive upper bound of the random jitter, in milliseconds.
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::store_writes()
    }
}

impl RetryPolicy {
    /// Policy for per-record store writes: 5 retries, capped at 8s, 100ms jitter.
    pub fn store_writes() -> Self {
        Self {
            max_retries: 5,
            unit: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(8),
            jitter_max_ms: 100,
        }
    }

    /// Policy for government feed downloads: 3 retries of `2^n` seconds, 100ms jitter.
    pub fn feed_downloads() -> Self {
        Self {
            max_retries: 3,
            unit: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            jitter_max_ms: 100,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_backoff_cap(mut self, backoff_cap: Duration) -> Self {
        self.backoff_cap = backoff_cap;
        self
    }

    pub fn with_jitter_max_ms(mut self, jitter_max_ms: u64) -> Self {
        self.jitter_max_ms = jitter_max_ms;
        self
    }

    /// Deterministic part of the delay before retry `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.unit
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }

    /// Full delay before retry `attempt`, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_max_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.jitter_max_ms)
        };
        self.backoff(attempt) + Duration::from_millis(jitter)
    }

    /// Run `operation` until it succeeds, fails permanently, exhausts the
    /// retry budget or `cancel` fires.
    ///
    /// The closure receives the zero-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T, E>
    where
        E: Retryable + fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(E::canceled());
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::canceled()),
                result = operation(attempt) => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(E::canceled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
