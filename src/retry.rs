//! Bounded retry with exponential backoff.
//!
//! [`RetryPolicy`] wraps any fallible async operation. Attempt `k` (1-based)
//! that fails with a retryable error is followed by a wait of
//! `unit * base^(k-1)` (capped, plus optional jitter) before attempt `k + 1`.
//! When the last attempt fails, or an error is not retryable, that error is
//! returned unchanged.
//!
//! ```text
//! attempts = 3, base = 2, unit = 1s
//! attempt 1 fails -> wait 1s
//! attempt 2 fails -> wait 2s
//! attempt 3 fails -> error propagates
//! ```

use crate::config::RetrySettings;
use crate::error::IngestError;
use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: u32,
    pub unit: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Backoff {
    pub fn exponential(base: u32, unit: Duration) -> Self {
        Self {
            base,
            unit,
            max_delay: Duration::from_secs(300),
            jitter: Duration::ZERO,
        }
    }

    /// Wait that follows failed attempt `attempt` (1-based), without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let delay = match self.base.checked_pow(exp) {
            Some(factor) => self.unit.saturating_mul(factor),
            None => self.max_delay,
        };
        delay.min(self.max_delay)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter.is_zero() {
            return delay;
        }
        let jitter_ms = rng().random_range(0..=self.jitter.as_millis() as u64);
        delay + Duration::from_millis(jitter_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        let mut backoff = Backoff::exponential(
            settings.backoff_base,
            Duration::from_millis(settings.backoff_unit_ms),
        );
        backoff.jitter = Duration::from_millis(settings.jitter_ms);
        Self::new(settings.max_attempts, backoff)
    }

    /// Run `op`, retrying errors that [`IngestError::is_transient`] accepts.
    ///
    /// See [`RetryPolicy::run_if`] for the attempt and backoff behavior.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T, IngestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        self.run_if(label, IngestError::is_transient, op).await
    }

    /// Run `op`, retrying only errors for which `is_retryable` returns true.
    ///
    /// Attempt `k` that fails with a retryable error is followed by a sleep of
    /// `backoff.delay(k)` (plus jitter) before attempt `k + 1`.
    ///
    /// # Arguments
    ///
    /// * `label` - Operation name used in log fields
    /// * `is_retryable` - Classifies each error
    /// * `op` - Builds a fresh future per attempt
    ///
    /// # Returns
    ///
    /// The first successful value.
    ///
    /// # Errors
    ///
    /// The last error, once `max_attempts` attempts have failed, or the first
    /// error `is_retryable` rejects. No sleep follows the final attempt.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        label: &str,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, E>
    where
        E: fmt::Display,
        P: Fn(&E) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

                    if !is_retryable(&e) {
                        error!(
                            op = label,
                            attempt,
                            elapsed_ms_total,
                            error = %e,
                            "non-retryable failure"
                        );
                        return Err(e);
                    }

                    if attempt >= self.max_attempts {
                        error!(
                            op = label,
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff.jittered(attempt);
                    warn!(
                        op = label,
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
