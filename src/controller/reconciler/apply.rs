//! # Apply Engine
//!
//! Renders manifests and converges the live objects towards them.
//!
//! - `apply_manifest` - create when absent, update when the rendered body is
//!   not already contained in the live object
//! - `apply_directly` - batch apply where every file is attempted
//! - `aggregate` - folds the failed files of a batch into one error
//! - `apply_deployment` - workload apply guarded by the generation ledger
//!
//! The comparison is semantic: fields the server fills in (defaults, status,
//! managed metadata) never trigger an update.

use crate::controller::retry::{retry_on_conflict, RetryConfig};
use crate::crd::{find_generation, GenerationStatus};
use crate::manifests::{KlusterletConfig, ManifestRenderer, RenderError};
use crate::observability::metrics;
use crate::store::{ResourceKey, ResourceStore, StoreError};
use kube::api::DynamicObject;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure applying one manifest
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Manifest could not be rendered
    #[error("failed to render manifest: {0}")]
    Render(#[from] RenderError),
    /// Rendered manifest is not a valid object
    #[error("failed to decode manifest: {0}")]
    Decode(#[from] serde_yaml::Error),
    /// Store rejected the read or write
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Store accepted a workload write without assigning a generation
    #[error("{0} has no generation")]
    MissingGeneration(String),
}

impl ApplyError {
    /// Broken manifests are defects, not cluster conditions
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplyError::Render(_) | ApplyError::Decode(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApplyError::Store(e) if e.is_conflict())
    }
}

/// Result of applying one file of a batch
#[derive(Debug)]
pub struct ApplyResult {
    pub file: String,
    /// Kind of the rendered object, `None` when rendering failed
    pub kind: Option<String>,
    pub error: Option<ApplyError>,
}

/// One failed file of a batch
#[derive(Debug)]
pub struct FailedApply {
    pub file: String,
    pub kind: Option<String>,
    pub error: ApplyError,
}

impl fmt::Display for FailedApply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ({}): {}",
            self.file,
            self.kind.as_deref().unwrap_or("unknown"),
            self.error
        )
    }
}

/// Every failure of a batch apply, one per line
#[derive(Debug)]
pub struct AggregateError {
    pub failures: Vec<FailedApply>,
}

impl AggregateError {
    pub fn is_fatal(&self) -> bool {
        self.failures.iter().any(|f| f.error.is_fatal())
    }

    /// Names of the files that failed, in apply order
    pub fn files(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.file.as_str()).collect()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        f.write_str(&lines.join("\n"))
    }
}

impl std::error::Error for AggregateError {}

/// What `apply_manifest` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Created,
    Updated,
    Unchanged,
}

impl ApplyAction {
    fn as_str(self) -> &'static str {
        match self {
            ApplyAction::Created => "created",
            ApplyAction::Updated => "updated",
            ApplyAction::Unchanged => "unchanged",
        }
    }
}

/// Render a manifest and decode it into an object
pub fn decode(
    renderer: &dyn ManifestRenderer,
    config: &KlusterletConfig,
    file: &str,
) -> Result<DynamicObject, ApplyError> {
    let bytes = renderer.render(file, config)?;
    Ok(serde_yaml::from_slice(&bytes)?)
}

/// Whether `required` is already contained in `live`
///
/// Every top-level field outside `metadata` and `status`, plus the rendered
/// labels and annotations, must be present with equal values. Extra fields on
/// the live object are ignored.
pub fn needs_update(required: &DynamicObject, live: &DynamicObject) -> bool {
    if let Some(fields) = required.data.as_object() {
        for (field, value) in fields {
            if field == "metadata" || field == "status" {
                continue;
            }
            match live.data.get(field) {
                Some(live_value) if is_subset(value, live_value) => {}
                _ => return true,
            }
        }
    }

    let labels_match = required.metadata.labels.iter().flatten().all(|(k, v)| {
        live.metadata.labels.as_ref().and_then(|l| l.get(k)) == Some(v)
    });
    let annotations_match = required.metadata.annotations.iter().flatten().all(|(k, v)| {
        live.metadata.annotations.as_ref().and_then(|a| a.get(k)) == Some(v)
    });
    !(labels_match && annotations_match)
}

fn is_subset(required: &Value, live: &Value) -> bool {
    match (required, live) {
        (Value::Object(required), Value::Object(live)) => required
            .iter()
            .all(|(k, v)| live.get(k).is_some_and(|lv| is_subset(v, lv))),
        (Value::Array(required), Value::Array(live)) => {
            required.len() == live.len()
                && required.iter().zip(live).all(|(r, l)| is_subset(r, l))
        }
        (Value::Null, _) => true,
        _ => required == live,
    }
}

/// Create-if-absent, update-if-different
///
/// Returns the action taken and the object as the store holds it afterwards.
pub async fn apply_manifest(
    store: &dyn ResourceStore,
    object: &DynamicObject,
) -> Result<(ApplyAction, DynamicObject), StoreError> {
    let key = ResourceKey::from_object(object)?;
    match store.get(&key).await? {
        None => {
            let created = store.create(object).await?;
            debug!(resource = %key, "Created");
            Ok((ApplyAction::Created, created))
        }
        Some(live) if !needs_update(object, &live) => Ok((ApplyAction::Unchanged, live)),
        Some(live) => {
            let mut desired = object.clone();
            desired.metadata.resource_version = live.metadata.resource_version.clone();
            let updated = store.update(&desired).await?;
            debug!(resource = %key, "Updated");
            Ok((ApplyAction::Updated, updated))
        }
    }
}

/// Apply every file, collecting one result per file
pub async fn apply_directly(
    store: &dyn ResourceStore,
    renderer: &dyn ManifestRenderer,
    config: &KlusterletConfig,
    files: &[&str],
) -> Vec<ApplyResult> {
    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let object = match decode(renderer, config, file) {
            Ok(object) => object,
            Err(error) => {
                results.push(ApplyResult {
                    file: (*file).to_string(),
                    kind: None,
                    error: Some(error),
                });
                continue;
            }
        };
        let kind = object.types.as_ref().map(|t| t.kind.clone());
        let kind_label = kind.clone().unwrap_or_default();

        match apply_manifest(store, &object).await {
            Ok((action, _)) => {
                metrics::increment_dependent_applies(&kind_label, action.as_str());
                results.push(ApplyResult {
                    file: (*file).to_string(),
                    kind,
                    error: None,
                });
            }
            Err(error) => {
                metrics::increment_dependent_applies(&kind_label, "error");
                warn!(file = %file, error = %error, "Failed to apply manifest");
                results.push(ApplyResult {
                    file: (*file).to_string(),
                    kind,
                    error: Some(error.into()),
                });
            }
        }
    }
    results
}

/// Fold the failed results of a batch, `None` when every file applied
pub fn aggregate(results: Vec<ApplyResult>) -> Option<AggregateError> {
    let failures: Vec<FailedApply> = results
        .into_iter()
        .filter_map(|result| {
            result.error.map(|error| FailedApply {
                file: result.file,
                kind: result.kind,
                error,
            })
        })
        .collect();
    if failures.is_empty() {
        None
    } else {
        Some(AggregateError { failures })
    }
}

/// Apply a workload and return its ledger entry
///
/// An existing workload is left alone when its generation matches the ledger
/// and its body already contains the rendered one. Otherwise it is updated
/// against the live resourceVersion; conflicts retry with a fresh read.
pub async fn apply_deployment(
    store: &dyn ResourceStore,
    renderer: &dyn ManifestRenderer,
    config: &KlusterletConfig,
    ledger: &[GenerationStatus],
    retry: &RetryConfig,
    file: &str,
) -> Result<GenerationStatus, ApplyError> {
    let required = decode(renderer, config, file)?;
    let key = ResourceKey::from_object(&required)?;

    let result = retry_on_conflict(retry, "apply_deployment", ApplyError::is_conflict, || {
        apply_deployment_once(store, ledger, required.clone(), &key)
    })
    .await;

    match result {
        Ok((action, entry)) => {
            metrics::increment_dependent_applies(&key.kind, action.as_str());
            Ok(entry)
        }
        Err(e) => {
            metrics::increment_dependent_applies(&key.kind, "error");
            Err(e)
        }
    }
}

async fn apply_deployment_once(
    store: &dyn ResourceStore,
    ledger: &[GenerationStatus],
    required: DynamicObject,
    key: &ResourceKey,
) -> Result<(ApplyAction, GenerationStatus), ApplyError> {
    let Some(live) = store.get(key).await? else {
        let created = store.create(&required).await?;
        info!(resource = %key, "Created workload");
        return Ok((ApplyAction::Created, ledger_entry(&created, key)?));
    };

    let live_entry = ledger_entry(&live, key)?;
    let recorded = find_generation(
        ledger,
        &live_entry.group,
        &live_entry.resource,
        &live_entry.namespace,
        &live_entry.name,
    )
    .map(|g| g.last_generation);

    if recorded == Some(live_entry.last_generation) && !needs_update(&required, &live) {
        return Ok((ApplyAction::Unchanged, live_entry));
    }

    let mut desired = required;
    desired.metadata.resource_version = live.metadata.resource_version.clone();
    let updated = store.update(&desired).await?;
    info!(resource = %key, "Updated workload");
    Ok((ApplyAction::Updated, ledger_entry(&updated, key)?))
}

fn ledger_entry(obj: &DynamicObject, key: &ResourceKey) -> Result<GenerationStatus, ApplyError> {
    GenerationStatus::for_object(obj).ok_or_else(|| ApplyError::MissingGeneration(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BOOTSTRAP_HUB_KUBECONFIG_SECRET, HUB_KUBECONFIG_SECRET};
    use crate::manifests::{EmbeddedManifests, STATIC_RESOURCE_FILES, WORK_DEPLOYMENT};
    use crate::store::memory::{FailureKind, InjectedFailure, Verb};
    use crate::store::InMemoryStore;
    use kube::api::{ObjectMeta, TypeMeta};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config() -> KlusterletConfig {
        KlusterletConfig {
            klusterlet_name: "demo".to_string(),
            klusterlet_namespace: "agents".to_string(),
            registration_image: "quay.io/ocm/registration:v1".to_string(),
            work_image: "quay.io/ocm/work:v1".to_string(),
            cluster_name: "east-1".to_string(),
            external_server_urls: String::new(),
            hub_kubeconfig_secret: HUB_KUBECONFIG_SECRET.to_string(),
            bootstrap_hub_kubeconfig_secret: BOOTSTRAP_HUB_KUBECONFIG_SECRET.to_string(),
        }
    }

    fn object(data: Value, labels: Option<BTreeMap<String, String>>) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("cm".to_string()),
                namespace: Some("agents".to_string()),
                labels,
                ..Default::default()
            },
            data,
        }
    }

    /// Renderer that fails for chosen files
    struct FailingRenderer(Vec<&'static str>);

    impl ManifestRenderer for FailingRenderer {
        fn render(&self, name: &str, config: &KlusterletConfig) -> Result<Vec<u8>, RenderError> {
            if self.0.iter().any(|f| *f == name) {
                return Err(RenderError::UnknownManifest(name.to_string()));
            }
            EmbeddedManifests.render(name, config)
        }
    }

    #[test]
    fn test_needs_update_ignores_server_defaults() {
        let required = object(json!({"data": {"a": "1"}}), None);
        let live = object(
            json!({"data": {"a": "1", "b": "2"}, "status": {"ready": true}}),
            Some(BTreeMap::from([("extra".to_string(), "x".to_string())])),
        );
        assert!(!needs_update(&required, &live));
    }

    #[test]
    fn test_needs_update_detects_changed_field() {
        let required = object(json!({"data": {"a": "2"}}), None);
        let live = object(json!({"data": {"a": "1"}}), None);
        assert!(needs_update(&required, &live));
    }

    #[test]
    fn test_needs_update_detects_missing_label() {
        let labels = BTreeMap::from([("app".to_string(), "klusterlet".to_string())]);
        let required = object(json!({"data": {}}), Some(labels));
        let live = object(json!({"data": {}}), None);
        assert!(needs_update(&required, &live));
    }

    #[test]
    fn test_needs_update_compares_arrays_by_position() {
        let required = object(json!({"rules": [{"verbs": ["get"]}]}), None);
        let live = object(json!({"rules": [{"verbs": ["get", "list"]}]}), None);
        assert!(needs_update(&required, &live));
    }

    #[tokio::test]
    async fn test_apply_manifest_is_idempotent() {
        let store = InMemoryStore::new();
        let obj = object(json!({"data": {"a": "1"}}), None);

        let (first, _) = apply_manifest(&store, &obj).await.unwrap();
        let (second, _) = apply_manifest(&store, &obj).await.unwrap();
        assert_eq!(first, ApplyAction::Created);
        assert_eq!(second, ApplyAction::Unchanged);

        let changed = object(json!({"data": {"a": "2"}}), None);
        let (third, live) = apply_manifest(&store, &changed).await.unwrap();
        assert_eq!(third, ApplyAction::Updated);
        assert_eq!(live.data["data"]["a"], "2");
    }

    #[tokio::test]
    async fn test_apply_directly_attempts_every_file() {
        let store = InMemoryStore::new();
        let all = STATIC_RESOURCE_FILES;
        let files = &all[..5];
        let renderer = FailingRenderer(vec![files[1], files[3]]);

        let results = apply_directly(&store, &renderer, &config(), files).await;
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r.error.is_none()).count(), 3);

        let err = aggregate(results).unwrap();
        assert_eq!(err.files(), vec![files[1], files[3]]);
        assert!(err.is_fatal());

        let message = err.to_string();
        assert_eq!(message.lines().count(), 2);
        assert!(message.starts_with(&format!("{:?} (unknown): ", files[1])));
    }

    #[tokio::test]
    async fn test_aggregate_store_failures_name_kind() {
        let store = InMemoryStore::new();
        store.fail(InjectedFailure::new(
            Verb::Create,
            "ClusterRole",
            None,
            FailureKind::Transient,
        ));

        let results =
            apply_directly(&store, &EmbeddedManifests, &config(), &STATIC_RESOURCE_FILES).await;
        let err = aggregate(results).unwrap();

        assert_eq!(
            err.files(),
            vec![
                "klusterlet-registration-clusterrole.yaml",
                "klusterlet-work-clusterrole.yaml"
            ]
        );
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("(ClusterRole)"));
    }

    #[test]
    fn test_aggregate_none_when_all_succeed() {
        let results = vec![ApplyResult {
            file: "a.yaml".to_string(),
            kind: Some("ServiceAccount".to_string()),
            error: None,
        }];
        assert!(aggregate(results).is_none());
    }

    #[tokio::test]
    async fn test_apply_deployment_keeps_generation_when_unchanged() {
        let store = InMemoryStore::new();
        let retry = RetryConfig::immediate(3);

        let first = apply_deployment(&store, &EmbeddedManifests, &config(), &[], &retry, WORK_DEPLOYMENT)
            .await
            .unwrap();
        assert_eq!(first.last_generation, 1);
        assert_eq!(first.name, "demo-work-agent");

        store.clear_operations();
        let ledger = vec![first.clone()];
        let second =
            apply_deployment(&store, &EmbeddedManifests, &config(), &ledger, &retry, WORK_DEPLOYMENT)
                .await
                .unwrap();
        assert_eq!(second, first);
        assert!(store.operations().iter().all(|op| op.verb == Verb::Get));
    }

    #[tokio::test]
    async fn test_apply_deployment_updates_changed_body() {
        let store = InMemoryStore::new();
        let retry = RetryConfig::immediate(3);
        let first = apply_deployment(&store, &EmbeddedManifests, &config(), &[], &retry, WORK_DEPLOYMENT)
            .await
            .unwrap();

        let mut changed = config();
        changed.work_image = "quay.io/ocm/work:v2".to_string();
        let second =
            apply_deployment(&store, &EmbeddedManifests, &changed, &[first], &retry, WORK_DEPLOYMENT)
                .await
                .unwrap();
        assert_eq!(second.last_generation, 2);
    }

    #[tokio::test]
    async fn test_apply_deployment_retries_conflicts() {
        let store = InMemoryStore::new();
        store.fail(
            InjectedFailure::new(Verb::Create, "Deployment", None, FailureKind::Conflict).times(2),
        );

        let entry = apply_deployment(
            &store,
            &EmbeddedManifests,
            &config(),
            &[],
            &RetryConfig::immediate(3),
            WORK_DEPLOYMENT,
        )
        .await
        .unwrap();
        assert_eq!(entry.last_generation, 1);
    }

    #[tokio::test]
    async fn test_apply_deployment_gives_up_after_conflicts() {
        let store = InMemoryStore::new();
        store.fail(
            InjectedFailure::new(Verb::Create, "Deployment", None, FailureKind::Conflict).times(3),
        );

        let err = apply_deployment(
            &store,
            &EmbeddedManifests,
            &config(),
            &[],
            &RetryConfig::immediate(3),
            WORK_DEPLOYMENT,
        )
        .await
        .unwrap_err();
        assert!(err.is_conflict());
        assert!(!err.is_fatal());
        let creates = store
            .operations()
            .into_iter()
            .filter(|op| op.verb == Verb::Create && op.kind == "Deployment")
            .count();
        assert_eq!(creates, 3);
    }

    #[tokio::test]
    async fn test_apply_deployment_render_failure_is_fatal() {
        let store = InMemoryStore::new();
        let renderer = FailingRenderer(vec![WORK_DEPLOYMENT]);
        let err = apply_deployment(
            &store,
            &renderer,
            &config(),
            &[],
            &RetryConfig::immediate(3),
            WORK_DEPLOYMENT,
        )
        .await
        .unwrap_err();
        assert!(err.is_fatal());
        assert!(store.operations().is_empty());
    }
}
