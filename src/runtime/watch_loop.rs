//! # Watch Loop
//!
//! Runs the kube-runtime controller for Klusterlets.
//!
//! Klusterlets are watched directly. Secrets and Deployments are watched
//! cluster-wide and mapped to their owning Klusterlet by name; events for
//! objects no Klusterlet owns are dropped.

use crate::controller::reconciler::routing::{route, ChangeEvent, ChangeKind};
use crate::controller::reconciler::{reconcile, ReconcileOutcome, Reconciler, ReconcilerError};
use crate::controller::server::ServerState;
use crate::crd::Klusterlet;
use crate::observability;
use crate::runtime::error_policy::{error_policy, reset_backoff};
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{self, Action};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher;
use kube_runtime::Controller;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Watcher timeout (seconds); must stay below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the controller until a shutdown signal arrives
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let klusterlets: Api<Klusterlet> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::all(client);

    let controller = Controller::new(
        klusterlets,
        watcher::Config::default().timeout(WATCH_TIMEOUT_SECS),
    );
    let secret_index = controller.store();
    let deployment_index = controller.store();
    let concurrency = reconciler.config.concurrency;

    info!(concurrency, "Starting Klusterlet controller");

    controller
        .watches(
            secrets,
            watcher::Config::default().timeout(WATCH_TIMEOUT_SECS),
            move |secret: Secret| map_event(ChangeKind::Secret, &secret.metadata, &secret_index.state()),
        )
        .watches(
            deployments,
            watcher::Config::default().timeout(WATCH_TIMEOUT_SECS),
            move |deployment: Deployment| {
                map_event(ChangeKind::Deployment, &deployment.metadata, &deployment_index.state())
            },
        )
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile_klusterlet, error_policy, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => debug!(klusterlet = %obj.name, ?action, "Reconciled"),
                Err(controller::Error::ReconcilerFailed(_, obj)) => {
                    debug!(klusterlet = %obj.name, "Reconcile failed, requeued by error policy");
                }
                Err(e) => warn!(error = %e, "Controller stream error"),
            }
        })
        .await;

    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("Klusterlet controller stopped");
    Ok(())
}

/// Queue key for a watched dependent
fn map_event(
    kind: ChangeKind,
    meta: &ObjectMeta,
    index: &[Arc<Klusterlet>],
) -> Option<ObjectRef<Klusterlet>> {
    let owner = route(&ChangeEvent::from_meta(kind, meta), index);
    observability::metrics::increment_events_routed(kind.as_str(), owner.is_some());
    owner.map(|name| ObjectRef::new(&name))
}

/// Adapts `reconcile` to the controller: deadline, metrics, backoff reset
pub async fn reconcile_klusterlet(
    obj: Arc<Klusterlet>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let span = tracing::info_span!("controller.reconcile", klusterlet = %name);

    async move {
        observability::metrics::increment_reconciliations();
        let start = Instant::now();
        let timeout = ctx.config.reconcile_timeout();

        let result = tokio::time::timeout(timeout, reconcile(&ctx, &name))
            .await
            .unwrap_or(Err(ReconcilerError::Timeout(timeout.as_secs())));
        observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        let outcome = result?;
        reset_backoff(&ctx, &name);
        Ok(action_for(outcome))
    }
    .instrument(span)
    .await
}

/// Every outcome waits for the next watch event; adding the finalizer
/// produces one itself
fn action_for(outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::NotFound
        | ReconcileOutcome::FinalizerAdded
        | ReconcileOutcome::CleanedUp
        | ReconcileOutcome::Applied => Action::await_change(),
    }
}
