//! # Reconciler
//!
//! Converges the klusterlet agents towards a `Klusterlet` resource.
//!
//! ## Modules
//!
//! - `routing` - maps dependent change events to the owning Klusterlet
//! - `apply` - renders manifests and creates or updates dependents
//! - `status` - condition and generation ledger updates with conflict retry
//! - `finalizer` - cleanup finalizer and the cleanup sequence
//! - `steps` - the ordered steps of an apply pass
//! - `reconcile` - one sync pass
//! - `types` - reconciler context, outcomes and errors

pub mod apply;
pub mod finalizer;
pub mod reconcile;
pub mod routing;
pub mod status;
pub mod steps;
pub mod types;

pub use reconcile::reconcile;
pub use types::{ReconcileOutcome, Reconciler, ReconcilerError};
