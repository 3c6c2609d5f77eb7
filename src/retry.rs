//! Retry utilities: exponential backoff and `Retry-After` handling
//!
//! Two independent, composable facilities:
//!
//! - [`retry_with_backoff`]: bounded exponential backoff with jitter, gated on
//!   [`Error::is_retryable`].
//! - [`parse_retry_after`] / [`wait_for_retry_after`]: parse and honor an upstream
//!   `Retry-After` value (delta-seconds or an RFC-1123 HTTP-date), capped by `max_wait`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use llm_gateway::retry::{retry_with_backoff, RetryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(std::time::Duration::from_secs(1));
//!
//! let result = retry_with_backoff(&config, || async {
//!     Ok::<_, llm_gateway::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for exponential-backoff retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles the delay each time)
    pub backoff_multiplier: f64,

    /// Add random jitter to prevent thundering herd (0.0 to 1.0)
    pub jitter_factor: f64,

    /// HTTP statuses on which an `Api` error is considered retryable
    pub retryable_status_codes: Vec<u16>,

    /// Upper bound on how long a `Retry-After` wait may be before we give up and
    /// surface the error instead of sleeping.
    pub max_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            retryable_status_codes: Error::default_retryable_statuses().to_vec(),
            max_wait: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.retryable_status_codes = codes;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Calculate delay for a given (zero-based) attempt with exponential backoff and jitter
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);

        Duration::from_millis(final_delay.max(0.0) as u64)
    }
}

/// Retry an async operation with exponential backoff, retrying only on errors
/// classified as retryable by [`Error::is_retryable`] against `config.retryable_status_codes`.
pub async fn retry_with_backoff<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable(&config.retryable_status_codes) {
                    return Err(err);
                }

                last_error = Some(err);

                if attempt < config.max_attempts - 1 {
                    sleep(config.calculate_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("retry failed with no recorded error")))
}

/// Parse a `Retry-After` header value. Accepts delta-seconds integers ("120") or an
/// RFC-1123 HTTP-date ("Wed, 21 Oct 2015 07:28:00 GMT"); any other form yields `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(target) = httpdate::parse_http_date(trimmed) {
        let now = std::time::SystemTime::now();
        return target.duration_since(now).ok();
    }
    None
}

/// Wait out a `Retry-After` duration, bounded by `max_wait`. Returns `Ok(())` if the
/// wait completed (the caller should retry), or `Err` (the original error, unmodified)
/// if `retry_after` exceeds `max_wait` — per spec, a wait that long is not slept through.
pub async fn wait_for_retry_after(retry_after: Duration, max_wait: Duration, on_too_long: Error) -> Result<()> {
    if retry_after > max_wait {
        return Err(on_too_long);
    }
    sleep(retry_after).await;
    Ok(())
}

/// Combined retry loop: when an attempt fails with a `RateLimit` carrying a
/// `retry_after`, honor it (bounded by `config.max_wait`); otherwise fall back to
/// exponential backoff for retryable errors.
pub async fn retry_with_backoff_and_retry_after<F, Fut, T>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if let Error::RateLimit {
                    retry_after: Some(wait),
                    ..
                } = &err
                {
                    let wait = *wait;
                    wait_for_retry_after(wait, config.max_wait, err).await?;
                    last_error = None;
                    continue;
                }

                if !err.is_retryable(&config.retryable_status_codes) {
                    return Err(err);
                }

                last_error = Some(err);
                if attempt < config.max_attempts - 1 {
                    sleep(config.calculate_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("retry failed with no recorded error")))
}
