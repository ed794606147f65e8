//! # Kubernetes Store
//!
//! `ResourceStore` and `KlusterletStore` backed by the Kubernetes API.

use super::{KlusterletStore, ResourceKey, ResourceStore, StoreError};
use crate::constants::FIELD_MANAGER;
use crate::crd::Klusterlet;
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams,
    PostParams,
};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Store talking to the API server through a shared client
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, key: &ResourceKey) -> Api<DynamicObject> {
        let (group, version) = match key.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", key.api_version.as_str()),
        };
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, &key.kind));
        match key.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

/// Map API errors onto the store taxonomy
fn classify(err: kube::Error, target: &str) -> StoreError {
    match err {
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound(target.to_string()),
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict(target.to_string()),
        other => StoreError::Api(other),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<DynamicObject>, StoreError> {
        self.dynamic_api(key)
            .get_opt(&key.name)
            .await
            .map_err(|e| classify(e, &key.to_string()))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ResourceKey::from_object(obj)?;
        debug!("Creating {}", key);
        self.dynamic_api(&key)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, &key.to_string()))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ResourceKey::from_object(obj)?;
        debug!("Updating {}", key);
        self.dynamic_api(&key)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, &key.to_string()))
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        debug!("Deleting {}", key);
        self.dynamic_api(key)
            .delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, &key.to_string()))
    }
}

#[async_trait]
impl KlusterletStore for KubeStore {
    async fn get(&self, name: &str) -> Result<Option<Klusterlet>, StoreError> {
        let api: Api<Klusterlet> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .map_err(|e| classify(e, &format!("Klusterlet {name}")))
    }

    async fn update(&self, klusterlet: &Klusterlet) -> Result<Klusterlet, StoreError> {
        let name = klusterlet.name_any();
        let api: Api<Klusterlet> = Api::all(self.client.clone());
        api.replace(&name, &PostParams::default(), klusterlet)
            .await
            .map_err(|e| classify(e, &format!("Klusterlet {name}")))
    }

    async fn update_status(&self, klusterlet: &Klusterlet) -> Result<Klusterlet, StoreError> {
        let name = klusterlet.name_any();
        let api: Api<Klusterlet> = Api::all(self.client.clone());

        // resourceVersion in the patch body makes the API server reject stale writes
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": klusterlet.resource_version(),
            },
            "status": klusterlet.status,
        });

        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(e, &format!("Klusterlet {name}")))
    }
}
