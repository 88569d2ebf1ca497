//! Bounded exponential backoff.
//!
//! Every polling loop in the workflows runs through [`RetryPolicy::retry`].
//! The operation classifies each failure as [`Backoff::Transient`] (retry
//! after the computed delay) or [`Backoff::Permanent`] (stop now). Once
//! `max_attempts` is reached the last transient error is returned as is,
//! so the caller sees it as a final failure.
//!
//! ```text
//! delay(n) = min(initial_interval * multiplier^n, max_interval)
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Classification of a failed attempt.
#[derive(Debug)]
pub enum Backoff<E> {
    /// Worth retrying (not converged yet, flaky read).
    Transient(E),
    /// Retrying cannot help.
    Permanent(E),
}

/// Exponential backoff bounded by an attempt count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub initial_interval_ms: u64,
    /// Growth factor applied after every retry.
    pub multiplier: f64,
    /// Upper bound for a single delay, in milliseconds.
    pub max_interval_ms: u64,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            multiplier: 1.5,
            max_interval_ms: 60_000,
            max_attempts: 25,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Used by tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_interval_ms: 0,
            multiplier: 1.0,
            max_interval_ms: 0,
            max_attempts,
        }
    }

    /// Same growth, but at most `retries` retries after the first attempt.
    pub fn with_max_retries(&self, retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1).min(self.max_attempts.max(1)),
            ..self.clone()
        }
    }

    /// Delay to wait after the `retry`-th failed attempt (zero-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let grown = self.initial_interval_ms as f64 * self.multiplier.powi(retry as i32);
        let capped = grown.min(self.max_interval_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Backoff<E>>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(Backoff::Permanent(err)) => return Err(err),
                Err(Backoff::Transient(err)) => {
                    if attempt >= max_attempts {
                        debug!(attempt, error = %err, "retry budget exhausted");
                        return Err(err);
                    }
                    let delay = self.delay(attempt - 1);
                    debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
