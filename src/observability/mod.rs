//! # Observability
//!
//! Prometheus metrics for the operator. Logging is plain `tracing`,
//! initialised in `runtime::initialization`.

pub mod metrics;
