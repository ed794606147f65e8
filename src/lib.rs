//! # Klusterlet Operator
//!
//! A Kubernetes operator that installs the klusterlet agents on a managed
//! cluster and removes them again when the `Klusterlet` is deleted.
//!
//! ## Overview
//!
//! For every cluster-scoped `Klusterlet` the operator:
//!
//! 1. **Guards deletion** - adds a cleanup finalizer before creating anything
//! 2. **Applies static resources** - namespace, service account, RBAC
//! 3. **Manages hub credentials** - creates a placeholder bootstrap secret and
//!    reads the registered cluster name back from the hub kubeconfig secret
//! 4. **Deploys the agents** - registration and work agent Deployments, with
//!    their observed generations recorded in status
//! 5. **Reports status** - an `Applied` condition describing the last pass
//!
//! On deletion every dependent is removed before the finalizer is released.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod manifests;
pub mod observability;
pub mod runtime;
pub mod store;
