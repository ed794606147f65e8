//! # Finalizer Protocol
//!
//! The cleanup finalizer gates deletion of a Klusterlet on removal of
//! everything it created.
//!
//! The finalizer is persisted before any dependent is created and released
//! only after every cleanup delete returned success or not-found.

use crate::constants::{HUB_KUBECONFIG_SECRET, KLUSTERLET_FINALIZER};
use crate::controller::reconciler::apply::{decode, ApplyError};
use crate::controller::reconciler::routing::{registration_agent_name, work_agent_name};
use crate::controller::retry::{retry_on_conflict, RetryConfig};
use crate::manifests::{KlusterletConfig, ManifestRenderer, STATIC_RESOURCE_FILES};
use crate::observability::metrics;
use crate::store::{KlusterletStore, ResourceKey, ResourceStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure of a cleanup sequence; the finalizer stays in place
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to resolve {file:?} for deletion: {source}")]
    Resolve {
        file: String,
        #[source]
        source: ApplyError,
    },
    #[error("failed to delete {key}: {source}")]
    Delete {
        key: ResourceKey,
        #[source]
        source: StoreError,
    },
}

impl CleanupError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CleanupError::Resolve { source, .. } if source.is_fatal())
    }
}

/// Add the cleanup finalizer to Klusterlet `name`
///
/// Returns `true` when the finalizer was written, `false` when it was already
/// present or the Klusterlet is gone.
pub async fn ensure_finalizer(
    store: &dyn KlusterletStore,
    retry: &RetryConfig,
    name: &str,
) -> Result<bool, StoreError> {
    retry_on_conflict(retry, "ensure_finalizer", StoreError::is_conflict, || async move {
        let Some(mut klusterlet) = store.get(name).await? else {
            return Ok(false);
        };
        if klusterlet.has_finalizer(KLUSTERLET_FINALIZER) {
            return Ok(false);
        }
        klusterlet
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(KLUSTERLET_FINALIZER.to_string());
        store.update(&klusterlet).await?;
        info!(klusterlet = %name, "Added cleanup finalizer");
        Ok::<bool, StoreError>(true)
    })
    .await
}

/// Remove the cleanup finalizer from Klusterlet `name`
///
/// Removing an absent finalizer is a no-op returning `false`.
pub async fn remove_finalizer(
    store: &dyn KlusterletStore,
    retry: &RetryConfig,
    name: &str,
) -> Result<bool, StoreError> {
    retry_on_conflict(retry, "remove_finalizer", StoreError::is_conflict, || async move {
        let Some(mut klusterlet) = store.get(name).await? else {
            return Ok(false);
        };
        if !klusterlet.has_finalizer(KLUSTERLET_FINALIZER) {
            return Ok(false);
        }
        if let Some(finalizers) = klusterlet.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != KLUSTERLET_FINALIZER);
        }
        match store.update(&klusterlet).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }
        info!(klusterlet = %name, "Removed cleanup finalizer");
        Ok::<bool, StoreError>(true)
    })
    .await
}

/// Objects removed by cleanup, in deletion order
///
/// Workloads first, then the hub kubeconfig secret, then the static
/// resources in the order they were created.
pub fn cleanup_targets(
    renderer: &dyn ManifestRenderer,
    config: &KlusterletConfig,
) -> Result<Vec<ResourceKey>, CleanupError> {
    let namespace = config.klusterlet_namespace.as_str();
    let mut targets = vec![
        ResourceKey::deployment(namespace, &registration_agent_name(&config.klusterlet_name)),
        ResourceKey::deployment(namespace, &work_agent_name(&config.klusterlet_name)),
        ResourceKey::secret(namespace, HUB_KUBECONFIG_SECRET),
    ];
    for file in STATIC_RESOURCE_FILES {
        let key = decode(renderer, config, file)
            .and_then(|obj| ResourceKey::from_object(&obj).map_err(ApplyError::from))
            .map_err(|source| CleanupError::Resolve {
                file: file.to_string(),
                source,
            })?;
        targets.push(key);
    }
    Ok(targets)
}

/// Delete every dependent of a Klusterlet
///
/// Not-found counts as deleted. Any other failure aborts the sequence.
pub async fn cleanup(
    store: &dyn ResourceStore,
    renderer: &dyn ManifestRenderer,
    config: &KlusterletConfig,
) -> Result<(), CleanupError> {
    let result = delete_all(store, renderer, config).await;
    metrics::increment_cleanups(if result.is_ok() { "success" } else { "error" });
    result
}

async fn delete_all(
    store: &dyn ResourceStore,
    renderer: &dyn ManifestRenderer,
    config: &KlusterletConfig,
) -> Result<(), CleanupError> {
    for key in cleanup_targets(renderer, config)? {
        match store.delete(&key).await {
            Ok(()) => debug!(resource = %key, "Deleted"),
            Err(e) if e.is_not_found() => debug!(resource = %key, "Already deleted"),
            Err(source) => {
                warn!(resource = %key, error = %source, "Cleanup aborted");
                return Err(CleanupError::Delete { key, source });
            }
        }
    }
    Ok(())
}
