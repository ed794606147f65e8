//! # Conflict Retry
//!
//! Bounded retry for read-modify-write operations that lose optimistic
//! concurrency races.
//!
//! The operation passed in must perform its own fresh read on every attempt;
//! only errors matching the predicate are retried, everything else is
//! returned immediately.
//!
//! ```ignore
//! retry_on_conflict(&RetryConfig::default(), "update_status", StoreError::is_conflict, || async {
//!     let current = store.get(name).await?;
//!     store.update_status(&modify(current)).await
//! })
//! .await?;
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_CONFLICT_RETRY_ATTEMPTS, DEFAULT_CONFLICT_RETRY_INITIAL_DELAY_MS,
    DEFAULT_CONFLICT_RETRY_MAX_DELAY_MS,
};

/// Bounds for conflict retries
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one, at least 1
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Cap on the delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CONFLICT_RETRY_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_CONFLICT_RETRY_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_CONFLICT_RETRY_MAX_DELAY_MS),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry without sleeping between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or `max_attempts` is exhausted.
pub async fn retry_on_conflict<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => {
                if attempt >= max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Conflict retries exhausted"
                    );
                    return Err(e);
                }

                // Jitter: 0.5x to 1.5x of the delay
                let jittered_delay = if delay.is_zero() {
                    delay
                } else {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
                };

                debug!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Conflict, retrying with a fresh read"
                );

                if !jittered_delay.is_zero() {
                    tokio::time::sleep(jittered_delay).await;
                }

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
