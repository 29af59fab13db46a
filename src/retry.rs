use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::{DappError, DappResult};

/// Retry configuration with jitter
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including initial attempt)
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 5_000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff delay before attempt `attempt + 1` (0-indexed)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exp_backoff = (self.base_backoff_ms as f64) * 2_f64.powi(attempt as i32);
        let capped_backoff = exp_backoff.min(self.max_backoff_ms as f64);

        let jitter_range = capped_backoff * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped_backoff + jitter).max(0.0) as u64)
    }
}

/// Retry an async operation while its error is retryable
///
/// Permanent errors (see [`DappError::is_retryable`]) return immediately.
/// Only wrap operations that are safe to repeat.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> DappResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DappResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            debug!(
                operation = operation_name,
                attempt = attempt + 1,
                max_attempts,
                "Retrying operation"
            );
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if !err.is_retryable() => {
                debug!(operation = operation_name, error = %err, "Permanent error, not retrying");
                return Err(err);
            }
            Err(err) if attempt + 1 >= max_attempts => {
                warn!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    error = %err,
                    "All retry attempts exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let backoff = config.calculate_backoff(attempt);
                debug!(
                    operation = operation_name,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient error, backing off before retry"
                );
                sleep(backoff).await;
            }
        }
        attempt += 1;
    }
}

/// Wrap any displayable failure as an RPC error
pub fn rpc_error(err: impl std::fmt::Display) -> DappError {
    DappError::Rpc(err.to_string())
}
