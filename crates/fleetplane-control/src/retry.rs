//! Retry logic with exponential backoff for provider calls.
//!
//! Only errors whose kind is retriable are retried. Everything else is
//! returned on the first attempt with its kind intact.

use std::future::Future;
use std::time::Duration;

use crate::provider::ProviderResult;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call (default: 3).
    pub max_retries: u32,
    /// Initial backoff duration (default: 200ms).
    pub initial_backoff: Duration,
    /// Maximum backoff duration (default: 10 seconds).
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (default: 2.0).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

/// Executor for retry operations.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new `RetryExecutor` with the given configuration.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The policy in use.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying retriable failures with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the first non-retriable error, or the last error once the
    /// retry budget is spent.
    pub async fn execute<F, Fut, T>(&self, what: &str, mut operation: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retriable() || attempt >= self.config.max_retries => {
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self.compute_backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        operation = %what,
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Compute the exponential backoff duration for a given attempt.
    ///
    /// Computes `initial_backoff * backoff_multiplier^attempt`, capped at
    /// `max_backoff`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn compute_backoff(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.config.initial_backoff.as_millis() as f64;
        let max_delay_ms = self.config.max_backoff.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);

        let computed = base_delay_ms * self.config.backoff_multiplier.powi(exponent);
        Duration::from_millis(computed.min(max_delay_ms) as u64)
    }
}
