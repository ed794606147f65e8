//! # Resource Store
//!
//! Narrow interfaces over the cluster API used by the reconciler.
//!
//! - `ResourceStore` - dependents (namespaces, RBAC, secrets, deployments) as
//!   untyped `DynamicObject`s addressed by `ResourceKey`
//! - `KlusterletStore` - the parent Klusterlet, including finalizer and
//!   status writes
//!
//! Writes are optimistic: an object carrying a `resourceVersion` that no
//! longer matches the live object fails with `StoreError::Conflict`.

mod kube_store;
pub mod memory;

pub use kube_store::KubeStore;
pub use memory::InMemoryStore;

use crate::crd::Klusterlet;
use async_trait::async_trait;
use kube::api::DynamicObject;
use std::fmt;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Address of one cluster object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    /// API version, e.g. `apps/v1` or `v1`
    pub api_version: String,
    pub kind: String,
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    pub fn namespace(name: &str) -> Self {
        Self::new("v1", "Namespace", None, name)
    }

    pub fn secret(namespace: &str, name: &str) -> Self {
        Self::new("v1", "Secret", Some(namespace), name)
    }

    pub fn deployment(namespace: &str, name: &str) -> Self {
        Self::new("apps/v1", "Deployment", Some(namespace), name)
    }

    /// Key of a rendered or fetched object
    pub fn from_object(obj: &DynamicObject) -> Result<Self, StoreError> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| StoreError::Invalid("object has no apiVersion/kind".to_string()))?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::Invalid(format!("{} has no metadata.name", types.kind)))?;
        Ok(Self {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            namespace: obj.metadata.namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Store errors, classified the way the reconciler reacts to them
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("{0} not found")]
    NotFound(String),
    /// Optimistic concurrency failure, retry with a fresh read
    #[error("conflict writing {0}: the object has been modified")]
    Conflict(String),
    /// Object cannot be addressed or encoded
    #[error("invalid object: {0}")]
    Invalid(String),
    /// Any other API failure, retried by the next pass
    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),
    /// Transient failure without an API error payload
    #[error("transient store error: {0}")]
    Transient(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Access to dependent resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, key: &ResourceKey) -> Result<Option<DynamicObject>, StoreError>;

    /// Create an object, returning it as persisted
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replace an object, returning it as persisted
    ///
    /// Conflicts when `metadata.resourceVersion` is set and stale.
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Delete an object; `StoreError::NotFound` when already gone
    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError>;
}

/// Access to Klusterlet resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KlusterletStore: Send + Sync {
    /// Fetch a Klusterlet, `None` when it does not exist
    async fn get(&self, name: &str) -> Result<Option<Klusterlet>, StoreError>;

    /// Persist metadata changes (finalizers) of a Klusterlet
    async fn update(&self, klusterlet: &Klusterlet) -> Result<Klusterlet, StoreError>;

    /// Persist the status subresource of a Klusterlet
    async fn update_status(&self, klusterlet: &Klusterlet) -> Result<Klusterlet, StoreError>;
}
