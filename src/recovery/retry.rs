//! Retry scheduling with exponential backoff
//!
//! `delay(n) = min(base * multiplier^(n-1), max_delay)`, optionally
//! perturbed by up to ±25% jitter so that clients failing together do not
//! retry together.

use super::types::{ErrorKind, LoadMoreError};
use crate::config::RetryConfig;
use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Fraction of the delay jitter may add or remove
const JITTER_FRACTION: f64 = 0.25;

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    config: RetryConfig,
    retryable: HashSet<ErrorKind>,
}

impl RetryScheduler {
    /// Create a scheduler from config
    pub fn new(config: RetryConfig) -> Self {
        let retryable = config.retryable_errors.iter().copied().collect();
        Self { config, retryable }
    }

    /// The configuration in use
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Maximum attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Backoff before retrying after `attempt` (1-based), without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_ms = self.config.max_delay_ms as f64;
        let ms = (self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent)).min(max_ms);
        Duration::from_millis(ms as u64)
    }

    /// Backoff before retrying after `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if !self.config.jitter {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        base.mul_f64(factor)
    }

    /// Whether `error` may be retried after `attempt`
    pub fn is_retryable(&self, error: &LoadMoreError, attempt: u32) -> bool {
        attempt < self.config.max_attempts && error.retryable && self.retryable.contains(&error.kind)
    }

    /// Run `operation` until it succeeds, a failure is not retryable, or
    /// attempts run out
    ///
    /// `classify` turns a raw failure into a [`LoadMoreError`]; `on_retry`
    /// is called with the error, the failed attempt and the upcoming delay
    /// before each wait. Exhausting attempts returns the last classified error.
    pub async fn execute_with_retry<T, E, Op, Fut, C, R>(
        &self,
        mut operation: Op,
        classify: C,
        mut on_retry: R,
    ) -> std::result::Result<T, LoadMoreError>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        C: Fn(E, u32) -> LoadMoreError,
        R: FnMut(&LoadMoreError, u32, Duration),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(raw) => {
                    let error = classify(raw, attempt);

                    if !self.is_retryable(&error, attempt) {
                        if attempt >= max_attempts {
                            warn!(code = %error.kind, attempt, "Retries exhausted");
                        }
                        return Err(error);
                    }

                    let delay = self.delay(attempt);
                    warn!(
                        "{} failed, attempt {}/{}, retrying in {:?}",
                        error.kind, attempt, max_attempts, delay
                    );
                    on_retry(&error, attempt, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
