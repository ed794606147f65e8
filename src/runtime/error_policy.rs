//! # Error Policy
//!
//! Requeue decisions for failed reconciliations.
//!
//! Backoff state is tracked per Klusterlet. Manifest defects are not retried
//! on a timer; they wait for the next change to the Klusterlet.

use crate::controller::backoff::BackoffState;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::Klusterlet;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
pub fn error_policy(obj: Arc<Klusterlet>, error: &ReconcilerError, ctx: Arc<Reconciler>) -> Action {
    let name = obj.name_any();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        klusterlet = %name,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!(kind = error.metric_label(), "Reconciliation error for {}: {}", name, error);
    observability::metrics::increment_reconciliation_errors();

    if error.is_fatal() {
        observability::metrics::increment_requeues_total("fatal");
        return Action::await_change();
    }

    let (backoff_seconds, error_count) = next_backoff(&ctx, &name);
    let next_trigger_time =
        chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "Retrying with Fibonacci backoff: {}s (error count: {}, next retry: {})",
        backoff_seconds,
        error_count,
        next_trigger_time.to_rfc3339()
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Advance the backoff of Klusterlet `name`, returning the delay and error count
pub fn next_backoff(ctx: &Reconciler, name: &str) -> (u64, u32) {
    match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(name.to_string()).or_insert_with(|| {
                BackoffState::new(ctx.config.backoff_min_secs, ctx.config.backoff_max_secs)
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using maximum backoff", e);
            (ctx.config.backoff_max_secs, 0)
        }
    }
}

/// Forget the error history of Klusterlet `name` after a successful pass
pub fn reset_backoff(ctx: &Reconciler, name: &str) {
    match ctx.backoff_states.lock() {
        Ok(mut states) => {
            states.remove(name);
        }
        Err(e) => warn!("Failed to lock backoff_states: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::crd::KlusterletSpec;
    use crate::manifests::RenderError;
    use crate::store::{InMemoryStore, StoreError};
    use crate::controller::reconciler::apply::ApplyError;

    fn reconciler() -> Arc<Reconciler> {
        let store = Arc::new(InMemoryStore::new());
        let config = ControllerConfig {
            backoff_min_secs: 5,
            backoff_max_secs: 12,
            ..Default::default()
        };
        Arc::new(Reconciler::new(store.clone(), store, config))
    }

    fn klusterlet() -> Arc<Klusterlet> {
        Arc::new(Klusterlet::new("demo", KlusterletSpec::default()))
    }

    #[test]
    fn test_backoff_grows_per_resource() {
        let ctx = reconciler();
        let delays: Vec<u64> = (0..4).map(|_| next_backoff(&ctx, "demo").0).collect();
        assert_eq!(delays, vec![5, 5, 10, 12]);
        assert_eq!(next_backoff(&ctx, "other").0, 5);
    }

    #[test]
    fn test_reset_backoff() {
        let ctx = reconciler();
        next_backoff(&ctx, "demo");
        next_backoff(&ctx, "demo");
        next_backoff(&ctx, "demo");
        reset_backoff(&ctx, "demo");
        assert_eq!(next_backoff(&ctx, "demo"), (5, 1));
    }

    #[test]
    fn test_transient_error_requeues() {
        let ctx = reconciler();
        let err = ReconcilerError::Store(StoreError::Transient("boom".to_string()));
        assert_eq!(
            error_policy(klusterlet(), &err, ctx),
            Action::requeue(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_fatal_error_waits_for_change() {
        let ctx = reconciler();
        let err = ReconcilerError::Apply(ApplyError::Render(RenderError::UnknownManifest(
            "x.yaml".to_string(),
        )));
        assert_eq!(error_policy(klusterlet(), &err, ctx.clone()), Action::await_change());
        assert!(ctx.backoff_states.lock().unwrap().is_empty());
    }
}
