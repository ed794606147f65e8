//! # Reconciler Types
//!
//! Core types for the reconciler: the context shared by every pass and the
//! error and outcome types a pass reports.

use crate::config::ControllerConfig;
use crate::controller::backoff::BackoffState;
use crate::controller::reconciler::apply::{AggregateError, ApplyError};
use crate::controller::reconciler::finalizer::CleanupError;
use crate::controller::retry::RetryConfig;
use crate::manifests::{EmbeddedManifests, ManifestRenderer};
use crate::store::{KlusterletStore, ResourceStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Dependencies of the reconciler, injected at construction
pub struct Reconciler {
    /// Klusterlet reads, finalizer and status writes
    pub klusterlets: Arc<dyn KlusterletStore>,
    /// Dependent resource reads and writes
    pub resources: Arc<dyn ResourceStore>,
    /// Manifest renderer
    pub renderer: Arc<dyn ManifestRenderer>,
    /// Bounds for optimistic concurrency retries
    pub retry: RetryConfig,
    /// Controller settings (timeouts, backoff bounds)
    pub config: ControllerConfig,
    /// Error backoff per Klusterlet, keyed by name
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("retry", &self.retry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Reconciler rendering the embedded manifests
    pub fn new(
        klusterlets: Arc<dyn KlusterletStore>,
        resources: Arc<dyn ResourceStore>,
        config: ControllerConfig,
    ) -> Self {
        Self::with_renderer(klusterlets, resources, Arc::new(EmbeddedManifests), config)
    }

    pub fn with_renderer(
        klusterlets: Arc<dyn KlusterletStore>,
        resources: Arc<dyn ResourceStore>,
        renderer: Arc<dyn ManifestRenderer>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            klusterlets,
            resources,
            renderer,
            retry: config.retry_config(),
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }
}

/// Result of one sync pass that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The Klusterlet no longer exists
    NotFound,
    /// The cleanup finalizer was added; the next pass applies resources
    FinalizerAdded,
    /// Dependents were removed and the finalizer released
    CleanedUp,
    /// Every component was applied and `Applied=True` recorded
    Applied,
}

/// Reconciliation errors
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Store failure while reading or writing the Klusterlet itself
    #[error("klusterlet store error: {0}")]
    Store(#[from] StoreError),
    /// A single dependent failed to apply
    #[error(transparent)]
    Apply(#[from] ApplyError),
    /// Several static resources failed to apply
    #[error(transparent)]
    ApplyBatch(#[from] AggregateError),
    /// Cleanup did not complete; the finalizer is kept
    #[error("cleanup failed: {0}")]
    Cleanup(#[from] CleanupError),
    /// The pass exceeded its deadline
    #[error("reconciliation timed out after {0}s")]
    Timeout(u64),
}

impl ReconcilerError {
    /// Errors caused by broken manifests rather than cluster state
    pub fn is_fatal(&self) -> bool {
        match self {
            ReconcilerError::Apply(e) => e.is_fatal(),
            ReconcilerError::ApplyBatch(e) => e.is_fatal(),
            ReconcilerError::Cleanup(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Short label for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReconcilerError::Store(_) => "store",
            ReconcilerError::Apply(_) => "apply",
            ReconcilerError::ApplyBatch(_) => "apply_batch",
            ReconcilerError::Cleanup(_) => "cleanup",
            ReconcilerError::Timeout(_) => "timeout",
        }
    }
}
