//! # Controller Configuration
//!
//! Reconciliation settings loaded from environment variables.

use super::env_var_or_default;
use crate::constants::{
    DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS, DEFAULT_CONFLICT_RETRY_ATTEMPTS,
    DEFAULT_CONFLICT_RETRY_INITIAL_DELAY_MS, DEFAULT_CONFLICT_RETRY_MAX_DELAY_MS,
    DEFAULT_CONTROLLER_CONCURRENCY, DEFAULT_RECONCILE_TIMEOUT_SECS,
};
use crate::controller::retry::RetryConfig;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Deadline of one sync pass (seconds)
    pub reconcile_timeout_secs: u64,
    /// Attempts for writes that lose an optimistic concurrency race
    pub conflict_retry_attempts: u32,
    /// Delay before the first conflict retry (milliseconds)
    pub conflict_retry_initial_delay_ms: u64,
    /// Error requeue backoff bounds (seconds)
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    /// Klusterlets reconciled concurrently
    pub concurrency: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            conflict_retry_attempts: DEFAULT_CONFLICT_RETRY_ATTEMPTS,
            conflict_retry_initial_delay_ms: DEFAULT_CONFLICT_RETRY_INITIAL_DELAY_MS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            concurrency: DEFAULT_CONTROLLER_CONCURRENCY,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            reconcile_timeout_secs: env_var_or_default(
                "RECONCILE_TIMEOUT_SECS",
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            ),
            conflict_retry_attempts: env_var_or_default(
                "CONFLICT_RETRY_ATTEMPTS",
                DEFAULT_CONFLICT_RETRY_ATTEMPTS,
            ),
            conflict_retry_initial_delay_ms: env_var_or_default(
                "CONFLICT_RETRY_INITIAL_DELAY_MS",
                DEFAULT_CONFLICT_RETRY_INITIAL_DELAY_MS,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            concurrency: env_var_or_default(
                "CONTROLLER_CONCURRENCY",
                DEFAULT_CONTROLLER_CONCURRENCY,
            ),
        }
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Bounds for conflict retries in status, finalizer and workload writes
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.conflict_retry_attempts.max(1),
            initial_delay: Duration::from_millis(self.conflict_retry_initial_delay_ms),
            max_delay: Duration::from_millis(DEFAULT_CONFLICT_RETRY_MAX_DELAY_MS),
            ..RetryConfig::default()
        }
    }
}
