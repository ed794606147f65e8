//! # Reconcile
//!
//! One sync pass over a Klusterlet.
//!
//! ```text
//! Resolve ─┬─ missing ──────────────────────────────────────────► NotFound
//!          └─ found ─┬─ deleting ─► Cleanup ─► RemoveFinalizer ──► CleanedUp
//!                    ├─ no finalizer ─► EnsureFinalizer ─────────► FinalizerAdded
//!                    └─ active ─► APPLY_SEQUENCE ─► commit status ► Applied
//! ```
//!
//! A failing step records `Applied=False` with a message describing the
//! failure and returns the error so the controller requeues the Klusterlet.

use crate::constants::{
    KLUSTERLET_APPLIED, KLUSTERLET_FINALIZER, REASON_APPLIED, REASON_APPLY_FAILED,
};
use crate::controller::reconciler::finalizer::{cleanup, ensure_finalizer, remove_finalizer};
use crate::controller::reconciler::status::{
    update_condition_fn, update_generations_fn, update_klusterlet_status,
    update_observed_generation_fn,
};
use crate::controller::reconciler::steps::{StepOutcome, SyncPass, APPLY_SEQUENCE};
use crate::controller::reconciler::types::{ReconcileOutcome, Reconciler, ReconcilerError};
use crate::crd::{Condition, ConditionStatus, Klusterlet};
use crate::manifests::KlusterletConfig;
use tracing::{debug, error, info, warn};

/// Message of the `Applied` condition after a successful pass
pub const APPLIED_MESSAGE: &str = "Klusterlet Component Applied";

/// Run one sync pass for Klusterlet `name`
pub async fn reconcile(ctx: &Reconciler, name: &str) -> Result<ReconcileOutcome, ReconcilerError> {
    let Some(klusterlet) = ctx.klusterlets.get(name).await? else {
        debug!(klusterlet = %name, "Klusterlet not found, nothing to do");
        return Ok(ReconcileOutcome::NotFound);
    };

    if klusterlet.is_deleting() {
        return finalize(ctx, &klusterlet, name).await;
    }

    if !klusterlet.has_finalizer(KLUSTERLET_FINALIZER) {
        // Dependents are only created once the finalizer is persisted
        if !ensure_finalizer(ctx.klusterlets.as_ref(), &ctx.retry, name).await? {
            debug!(klusterlet = %name, "Finalizer already present or Klusterlet gone");
        }
        return Ok(ReconcileOutcome::FinalizerAdded);
    }

    apply(ctx, &klusterlet, name).await
}

async fn finalize(
    ctx: &Reconciler,
    klusterlet: &Klusterlet,
    name: &str,
) -> Result<ReconcileOutcome, ReconcilerError> {
    // Cleanup runs even when our finalizer was stripped while another one
    // keeps the Klusterlet alive
    let config = KlusterletConfig::from_klusterlet(klusterlet);
    info!(
        klusterlet = %name,
        namespace = %config.klusterlet_namespace,
        "Cleaning up klusterlet components"
    );
    cleanup(ctx.resources.as_ref(), ctx.renderer.as_ref(), &config).await?;
    if !remove_finalizer(ctx.klusterlets.as_ref(), &ctx.retry, name).await? {
        debug!(klusterlet = %name, "Cleanup finalizer already absent");
    }
    info!(klusterlet = %name, "Cleanup complete");
    Ok(ReconcileOutcome::CleanedUp)
}

async fn apply(
    ctx: &Reconciler,
    klusterlet: &Klusterlet,
    name: &str,
) -> Result<ReconcileOutcome, ReconcilerError> {
    let mut pass = SyncPass::new(ctx, klusterlet);

    for step in APPLY_SEQUENCE {
        let err = match pass.run(step).await {
            StepOutcome::Continue => continue,
            StepOutcome::Retryable(err) => {
                warn!(klusterlet = %name, step = step.name(), error = %err, "Sync step failed");
                err
            }
            StepOutcome::Fatal(err) => {
                error!(
                    klusterlet = %name,
                    step = step.name(),
                    error = %err,
                    "Embedded manifests are broken, this is a defect in the operator"
                );
                err
            }
        };
        record_failure(ctx, name, pass.failure_message(step, &err)).await;
        return Err(err);
    }

    let condition = Condition::new(
        KLUSTERLET_APPLIED,
        ConditionStatus::True,
        REASON_APPLIED,
        APPLIED_MESSAGE,
    );
    update_klusterlet_status(
        ctx.klusterlets.as_ref(),
        &ctx.retry,
        name,
        &[
            update_condition_fn(condition),
            update_generations_fn(pass.generations),
            update_observed_generation_fn(klusterlet.metadata.generation),
        ],
    )
    .await?;

    info!(klusterlet = %name, "Klusterlet components applied");
    Ok(ReconcileOutcome::Applied)
}

/// Write `Applied=False`; a failed write is logged and does not mask the
/// step error
async fn record_failure(ctx: &Reconciler, name: &str, message: String) {
    let condition = Condition::new(
        KLUSTERLET_APPLIED,
        ConditionStatus::False,
        REASON_APPLY_FAILED,
        message,
    );
    if let Err(e) = update_klusterlet_status(
        ctx.klusterlets.as_ref(),
        &ctx.retry,
        name,
        &[update_condition_fn(condition)],
    )
    .await
    {
        warn!(klusterlet = %name, error = %e, "Failed to record apply failure in status");
    }
}
