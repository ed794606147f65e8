//! # In-Memory Store
//!
//! A `ResourceStore` and `KlusterletStore` kept in process memory.
//!
//! It mimics the API server behaviour the reconciler depends on:
//! - every write bumps `metadata.resourceVersion`; stale writes conflict
//! - Deployments get `metadata.generation` 1 on create, bumped when the body changes
//! - a Klusterlet with a deletion timestamp disappears once its last finalizer is removed
//!
//! Failures can be injected per verb/kind/name, and every call is recorded in
//! an operation log so tests can assert on ordering.

use super::{KlusterletStore, ResourceKey, ResourceStore, StoreError};
use crate::crd::Klusterlet;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

const KLUSTERLET_KIND: &str = "Klusterlet";
const DEPLOYMENT_KIND: &str = "Deployment";

/// Store call kinds, as recorded in the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

/// One recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOp {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

/// Error returned by an injected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Conflict,
    NotFound,
    Transient,
}

/// A failure returned for matching calls, `times` times
#[derive(Debug, Clone)]
pub struct InjectedFailure {
    pub verb: Verb,
    pub kind: String,
    /// `None` matches every name of the kind
    pub name: Option<String>,
    pub failure: FailureKind,
    pub times: usize,
}

impl InjectedFailure {
    pub fn new(verb: Verb, kind: &str, name: Option<&str>, failure: FailureKind) -> Self {
        Self {
            verb,
            kind: kind.to_string(),
            name: name.map(str::to_string),
            failure,
            times: usize::MAX,
        }
    }

    /// Limit the failure to the next `times` matching calls
    pub fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    fn matches(&self, verb: Verb, kind: &str, name: &str) -> bool {
        self.verb == verb && self.kind == kind && self.name.as_deref().is_none_or(|n| n == name)
    }

    fn to_error(&self, target: String) -> StoreError {
        match self.failure {
            FailureKind::Conflict => StoreError::Conflict(target),
            FailureKind::NotFound => StoreError::NotFound(target),
            FailureKind::Transient => StoreError::Transient(format!("injected failure for {target}")),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ResourceKey, DynamicObject>,
    klusterlets: BTreeMap<String, Klusterlet>,
    resource_version: u64,
    operations: Vec<StoreOp>,
    failures: Vec<InjectedFailure>,
}

impl Inner {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    /// Record a call and return the injected failure for it, if any
    fn record(&mut self, verb: Verb, kind: &str, name: &str) -> Result<(), StoreError> {
        self.operations.push(StoreOp {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
        });

        let Some(idx) = self.failures.iter().position(|f| f.matches(verb, kind, name)) else {
            return Ok(());
        };
        let err = self.failures[idx].to_error(format!("{kind} {name}"));
        self.failures[idx].times -= 1;
        if self.failures[idx].times == 0 {
            self.failures.remove(idx);
        }
        Err(err)
    }
}

/// Body of an object without server-managed sections
fn body(obj: &DynamicObject) -> serde_json::Value {
    let mut data = obj.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

fn is_stale(incoming: Option<&String>, current: Option<&String>) -> bool {
    matches!(incoming, Some(rv) if Some(rv) != current)
}

/// In-memory implementation of both store traits
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a Klusterlet as if created by a user
    pub fn insert_klusterlet(&self, mut klusterlet: Klusterlet) {
        let mut inner = self.lock();
        klusterlet.metadata.resource_version = Some(inner.next_resource_version());
        klusterlet.metadata.generation.get_or_insert(1);
        inner.klusterlets.insert(klusterlet.name_any(), klusterlet);
    }

    /// Seed a dependent object as if created by someone else
    pub fn insert_object(&self, mut obj: DynamicObject) -> Result<(), StoreError> {
        let key = ResourceKey::from_object(&obj)?;
        let mut inner = self.lock();
        obj.metadata.resource_version = Some(inner.next_resource_version());
        if key.kind == DEPLOYMENT_KIND {
            obj.metadata.generation.get_or_insert(1);
        }
        inner.objects.insert(key, obj);
        Ok(())
    }

    /// Current state of a Klusterlet
    pub fn klusterlet(&self, name: &str) -> Option<Klusterlet> {
        self.lock().klusterlets.get(name).cloned()
    }

    /// Current state of a dependent object
    pub fn object(&self, key: &ResourceKey) -> Option<DynamicObject> {
        self.lock().objects.get(key).cloned()
    }

    /// Keys of all dependent objects
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Mark a Klusterlet as deleted, like `kubectl delete` does
    ///
    /// A Klusterlet without finalizers is removed right away.
    pub fn request_deletion(&self, name: &str) -> Result<(), StoreError> {
        let timestamp: Time = serde_json::from_value(serde_json::Value::String(
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        ))
        .map_err(|e| StoreError::Invalid(format!("deletion timestamp: {e}")))?;

        let mut inner = self.lock();
        let rv = inner.next_resource_version();
        let Some(klusterlet) = inner.klusterlets.get_mut(name) else {
            return Err(StoreError::NotFound(format!("{KLUSTERLET_KIND} {name}")));
        };
        klusterlet.metadata.deletion_timestamp = Some(timestamp);
        klusterlet.metadata.resource_version = Some(rv);
        if klusterlet.finalizers().is_empty() {
            inner.klusterlets.remove(name);
        }
        Ok(())
    }

    /// Inject a failure for matching calls
    pub fn fail(&self, failure: InjectedFailure) {
        self.lock().failures.push(failure);
    }

    /// Every call made so far, in order
    pub fn operations(&self) -> Vec<StoreOp> {
        self.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<DynamicObject>, StoreError> {
        let mut inner = self.lock();
        inner.record(Verb::Get, &key.kind, &key.name)?;
        Ok(inner.objects.get(key).cloned())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ResourceKey::from_object(obj)?;
        let mut inner = self.lock();
        inner.record(Verb::Create, &key.kind, &key.name)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{key} already exists")));
        }

        let mut created = obj.clone();
        created.metadata.resource_version = Some(inner.next_resource_version());
        if key.kind == DEPLOYMENT_KIND {
            created.metadata.generation = Some(1);
        }
        inner.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ResourceKey::from_object(obj)?;
        let mut inner = self.lock();
        inner.record(Verb::Update, &key.kind, &key.name)?;
        let Some(current) = inner.objects.get(&key).cloned() else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        if is_stale(
            obj.metadata.resource_version.as_ref(),
            current.metadata.resource_version.as_ref(),
        ) {
            return Err(StoreError::Conflict(key.to_string()));
        }

        let mut updated = obj.clone();
        updated.metadata.resource_version = Some(inner.next_resource_version());
        if key.kind == DEPLOYMENT_KIND {
            let generation = current.metadata.generation.unwrap_or(1);
            updated.metadata.generation = Some(if body(&current) == body(obj) {
                generation
            } else {
                generation + 1
            });
        }
        inner.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.record(Verb::Delete, &key.kind, &key.name)?;
        inner
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl KlusterletStore for InMemoryStore {
    async fn get(&self, name: &str) -> Result<Option<Klusterlet>, StoreError> {
        let mut inner = self.lock();
        inner.record(Verb::Get, KLUSTERLET_KIND, name)?;
        Ok(inner.klusterlets.get(name).cloned())
    }

    async fn update(&self, klusterlet: &Klusterlet) -> Result<Klusterlet, StoreError> {
        let name = klusterlet.name_any();
        let mut inner = self.lock();
        inner.record(Verb::Update, KLUSTERLET_KIND, &name)?;
        let Some(current) = inner.klusterlets.get(&name).cloned() else {
            return Err(StoreError::NotFound(format!("{KLUSTERLET_KIND} {name}")));
        };
        if is_stale(
            klusterlet.metadata.resource_version.as_ref(),
            current.metadata.resource_version.as_ref(),
        ) {
            return Err(StoreError::Conflict(format!("{KLUSTERLET_KIND} {name}")));
        }

        let mut updated = klusterlet.clone();
        updated.status = current.status.clone();
        updated.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        updated.metadata.generation = if current.spec == klusterlet.spec {
            current.metadata.generation
        } else {
            current.metadata.generation.map(|g| g + 1)
        };
        updated.metadata.resource_version = Some(inner.next_resource_version());

        if updated.is_deleting() && updated.finalizers().is_empty() {
            inner.klusterlets.remove(&name);
        } else {
            inner.klusterlets.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, klusterlet: &Klusterlet) -> Result<Klusterlet, StoreError> {
        let name = klusterlet.name_any();
        let mut inner = self.lock();
        inner.record(Verb::UpdateStatus, KLUSTERLET_KIND, &name)?;
        let rv = inner.next_resource_version();
        let Some(current) = inner.klusterlets.get_mut(&name) else {
            return Err(StoreError::NotFound(format!("{KLUSTERLET_KIND} {name}")));
        };
        if is_stale(
            klusterlet.metadata.resource_version.as_ref(),
            current.metadata.resource_version.as_ref(),
        ) {
            return Err(StoreError::Conflict(format!("{KLUSTERLET_KIND} {name}")));
        }

        current.status = klusterlet.status.clone();
        current.metadata.resource_version = Some(rv);
        Ok(current.clone())
    }
}
