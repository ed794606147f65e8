//! # Server Configuration
//!
//! Settings of the HTTP server that serves `/metrics`, `/healthz` and
//! `/readyz`. Loaded from environment variables and checked before the
//! server is started.

use super::env_var_or_default;
use crate::constants::{
    DEFAULT_METRICS_PORT, DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
};
use std::time::Duration;
use thiserror::Error;

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port for metrics and health endpoints (`METRICS_PORT`)
    pub metrics_port: u16,
    /// How long startup waits for the server to report ready (seconds)
    pub startup_timeout_secs: u64,
    /// Readiness poll interval during startup (milliseconds)
    pub poll_interval_ms: u64,
}

/// A server setting the operator cannot start with
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerConfigError {
    #[error("metrics port must not be 0")]
    ZeroPort,
    #[error("server poll interval must be greater than 0 ms")]
    ZeroPollInterval,
    #[error("server startup timeout of {timeout_secs}s is shorter than the {poll_interval_ms}ms poll interval")]
    StartupTimeoutBelowPollInterval {
        timeout_secs: u64,
        poll_interval_ms: u64,
    },
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }

    /// Reject settings that would bind an ephemeral port or make the
    /// readiness wait spin or give up before its first poll
    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if self.metrics_port == 0 {
            return Err(ServerConfigError::ZeroPort);
        }
        if self.poll_interval_ms == 0 {
            return Err(ServerConfigError::ZeroPollInterval);
        }
        if self.startup_timeout() < self.poll_interval() {
            return Err(ServerConfigError::StartupTimeoutBelowPollInterval {
                timeout_secs: self.startup_timeout_secs,
                poll_interval_ms: self.poll_interval_ms,
            });
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
