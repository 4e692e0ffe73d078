//! Retry logic with exponential backoff and jitter for transient errors.

use crate::error::{ApiError, Error, Result};
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Fraction of each delay that is randomized (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Shave a random fraction off `delay` so concurrent workers don't retry in lockstep.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        delay.mul_f64(factor)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback: Send + Sync {
    /// Called when an operation is about to be retried.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Wait before the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ApiError, delay: Duration);
}

/// Callback that logs retries at warn level.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ApiError, delay: Duration) {
        log::warn!(
            "Attempt {}/{} failed: {}. Retrying in {:.1}s...",
            attempt,
            max_attempts,
            error,
            delay.as_secs_f64()
        );
    }
}

/// Execute an operation with retry logic.
///
/// Retryable errors are retried with exponential backoff, or after the
/// server-supplied wait when the error carries one. Non-retryable errors
/// are returned immediately.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> std::result::Result<T, ApiError>,
{
    with_retry_if(config, callback, ApiError::is_retryable, operation)
}

/// Like [`with_retry`], but only errors accepted by `retry_when` are retried.
pub fn with_retry_if<T, F, R>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    retry_when: R,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> std::result::Result<T, ApiError>,
    R: Fn(&ApiError) -> bool,
{
    let max_attempts = config.max_attempts.max(1);

    let mut attempt = 0;

    loop {
        let err = match operation() {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        attempt += 1;

        // If error is not retryable, or this was the last attempt, give up
        if !retry_when(&err) || attempt >= max_attempts {
            return Err(Error::from_api(err, attempt));
        }

        let delay = err
            .retry_after()
            .unwrap_or_else(|| config.jittered(config.delay_for_attempt(attempt - 1)));

        if let Some(cb) = callback {
            cb.on_retry(attempt, max_attempts, &err, delay);
        }

        thread::sleep(delay);
    }
}
