//! # Dependent Metrics
//!
//! Metrics for dependent resources: applies per kind and cleanup passes.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::IntCounterVec;
use std::sync::LazyLock;

static DEPENDENT_APPLIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "klusterlet_dependent_applies_total",
            "Total number of dependent resource applies by kind and result",
        ),
        &["kind", "result"],
    )
    .expect("Failed to create DEPENDENT_APPLIES_TOTAL metric - this should never happen")
});

static CLEANUPS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "klusterlet_cleanups_total",
            "Total number of cleanup passes by result",
        ),
        &["result"],
    )
    .expect("Failed to create CLEANUPS_TOTAL metric - this should never happen")
});

/// Register dependent metrics with the registry
pub(crate) fn register_dependent_metrics() -> Result<()> {
    REGISTRY.register(Box::new(DEPENDENT_APPLIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CLEANUPS_TOTAL.clone()))?;
    Ok(())
}

/// Result label: `created`, `updated`, `unchanged` or `error`
pub fn increment_dependent_applies(kind: &str, result: &str) {
    DEPENDENT_APPLIES_TOTAL.with_label_values(&[kind, result]).inc();
}

/// Result label: `success` or `error`
pub fn increment_cleanups(result: &str) {
    CLEANUPS_TOTAL.with_label_values(&[result]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_dependent_applies() {
        let before = DEPENDENT_APPLIES_TOTAL.with_label_values(&["Deployment", "created"]).get();
        increment_dependent_applies("Deployment", "created");
        let after = DEPENDENT_APPLIES_TOTAL.with_label_values(&["Deployment", "created"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_cleanups() {
        let before = CLEANUPS_TOTAL.with_label_values(&["success"]).get();
        increment_cleanups("success");
        let after = CLEANUPS_TOTAL.with_label_values(&["success"]).get();
        assert_eq!(after, before + 1u64);
    }
}
