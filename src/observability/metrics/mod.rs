//! # Metrics Module
//!
//! Prometheus metrics for monitoring the operator, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup and registration
//! - `controller_metrics` - Reconciliations, requeues and routed events
//! - `dependent_metrics` - Applies and cleanups of dependent resources

pub mod controller_metrics;
pub mod dependent_metrics;
pub mod registry;

pub use controller_metrics::*;
pub use dependent_metrics::*;
pub use registry::*;
