//! Retry with random exponential backoff for model calls.
//!
//! After the n-th failure the wait is drawn uniformly from
//! `[min_wait, clamp(min_wait * 2^(n-1), min_wait, max_wait)]`. Only
//! transient [`ProviderError`]s are retried; the rest are returned at once.

use std::future::Future;
use std::time::Duration;

use agentloop_config::RetrySettings;
use agentloop_core::error::{GatewayError, ProviderError};
use rand::Rng;
use tracing::{debug, warn};

/// Attempt budget and wait bounds.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            min_wait: Duration::from_millis(settings.min_wait_ms),
            max_wait: Duration::from_millis(settings.max_wait_ms),
        }
    }

    /// Retry up to `max_attempts` times without waiting in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    /// Upper bound of the wait that follows the `failures`-th failure.
    pub fn backoff_ceiling(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let grown = self.min_wait.saturating_mul(1u32 << exponent);
        grown.clamp(self.min_wait, self.max_wait.max(self.min_wait))
    }

    /// A random wait in `[min_wait, backoff_ceiling(failures)]`.
    pub fn wait_for(&self, failures: u32, error: &ProviderError) -> Duration {
        let ceiling = self.backoff_ceiling(failures);
        let low = self.min_wait.as_millis() as u64;
        let high = ceiling.as_millis() as u64;
        let mut wait = Duration::from_millis(rand::rng().random_range(low..=high));

        // Respect the server's hint, within our own bound
        if let ProviderError::RateLimited { retry_after_secs } = error {
            let hinted = Duration::from_secs(*retry_after_secs).min(self.max_wait);
            wait = wait.max(hinted);
        }
        wait
    }
}

/// Run `operation` until it succeeds, fails permanently, or the budget runs out.
///
/// Exhausting the budget on transient failures yields
/// [`GatewayError::ModelUnavailable`] carrying the last error; a
/// non-transient failure is returned as [`GatewayError::Provider`] after one
/// attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                debug!(operation = %operation_name, attempt, error = %e, "Non-retryable error");
                return Err(GatewayError::Provider(e));
            }
            Err(e) if attempt >= policy.max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempts = attempt,
                    error = %e,
                    "Retry budget exhausted"
                );
                return Err(GatewayError::ModelUnavailable {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                let delay = policy.wait_for(attempt, &e);
                warn!(
                    operation = %operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
