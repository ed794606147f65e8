//! # Sync Steps
//!
//! The ordered steps of an apply pass for an active Klusterlet.
//!
//! A `SyncPass` carries the state one step hands to the next (render
//! parameters, the hub kubeconfig secret, workload generations) and turns
//! every step result into a uniform `StepOutcome`.

use crate::constants::{CLUSTER_NAME_SECRET_KEY, HUB_KUBECONFIG_SECRET};
use crate::controller::reconciler::apply::{
    aggregate, apply_deployment, apply_directly, apply_manifest, ApplyError,
};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::{GenerationStatus, Klusterlet};
use crate::manifests::{
    KlusterletConfig, REGISTRATION_DEPLOYMENT, STATIC_RESOURCE_FILES, WORK_DEPLOYMENT,
};
use crate::store::{ResourceKey, StoreError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// One step of an apply pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    EnsureNamespace,
    ApplyStaticResources,
    EnsureHubConfigSecret,
    ApplyRegistrationAgent,
    ResolveClusterName,
    ApplyWorkAgent,
}

/// Steps of an apply pass, in execution order
pub const APPLY_SEQUENCE: [SyncStep; 6] = [
    SyncStep::EnsureNamespace,
    SyncStep::ApplyStaticResources,
    SyncStep::EnsureHubConfigSecret,
    SyncStep::ApplyRegistrationAgent,
    SyncStep::ResolveClusterName,
    SyncStep::ApplyWorkAgent,
];

impl SyncStep {
    pub fn name(&self) -> &'static str {
        match self {
            SyncStep::EnsureNamespace => "ensure_namespace",
            SyncStep::ApplyStaticResources => "apply_static_resources",
            SyncStep::EnsureHubConfigSecret => "ensure_hub_config_secret",
            SyncStep::ApplyRegistrationAgent => "apply_registration_agent",
            SyncStep::ResolveClusterName => "resolve_cluster_name",
            SyncStep::ApplyWorkAgent => "apply_work_agent",
        }
    }
}

/// Result of running one step
#[derive(Debug)]
pub enum StepOutcome {
    Continue,
    /// Cluster state problem, the next pass may succeed
    Retryable(ReconcilerError),
    /// Defect in the shipped manifests
    Fatal(ReconcilerError),
}

impl From<Result<(), ReconcilerError>> for StepOutcome {
    fn from(result: Result<(), ReconcilerError>) -> Self {
        match result {
            Ok(()) => StepOutcome::Continue,
            Err(e) if e.is_fatal() => StepOutcome::Fatal(e),
            Err(e) => StepOutcome::Retryable(e),
        }
    }
}

/// State of one apply pass over a Klusterlet
pub struct SyncPass<'a> {
    ctx: &'a Reconciler,
    klusterlet: &'a Klusterlet,
    /// Render parameters; the cluster name may be filled in mid-pass
    pub config: KlusterletConfig,
    hub_secret: Option<DynamicObject>,
    /// Ledger entries of the workloads applied so far
    pub generations: Vec<GenerationStatus>,
}

impl std::fmt::Debug for SyncPass<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPass")
            .field("klusterlet", &self.klusterlet.name_any())
            .field("config", &self.config)
            .field("generations", &self.generations)
            .finish_non_exhaustive()
    }
}

impl<'a> SyncPass<'a> {
    pub fn new(ctx: &'a Reconciler, klusterlet: &'a Klusterlet) -> Self {
        Self {
            ctx,
            klusterlet,
            config: KlusterletConfig::from_klusterlet(klusterlet),
            hub_secret: None,
            generations: Vec::new(),
        }
    }

    pub async fn run(&mut self, step: SyncStep) -> StepOutcome {
        debug!(
            klusterlet = %self.config.klusterlet_name,
            step = step.name(),
            "Running sync step"
        );
        self.execute(step).await.into()
    }

    async fn execute(&mut self, step: SyncStep) -> Result<(), ReconcilerError> {
        match step {
            SyncStep::EnsureNamespace => self.ensure_namespace().await,
            SyncStep::ApplyStaticResources => self.apply_static_resources().await,
            SyncStep::EnsureHubConfigSecret => self.ensure_hub_config_secret().await,
            SyncStep::ApplyRegistrationAgent => self.apply_workload(REGISTRATION_DEPLOYMENT).await,
            SyncStep::ResolveClusterName => {
                self.resolve_cluster_name();
                Ok(())
            }
            SyncStep::ApplyWorkAgent => self.apply_workload(WORK_DEPLOYMENT).await,
        }
    }

    /// Condition message for a failed step
    pub fn failure_message(&self, step: SyncStep, err: &ReconcilerError) -> String {
        let namespace = &self.config.klusterlet_namespace;
        match step {
            SyncStep::EnsureNamespace => format!("Failed to ensure namespace {namespace:?}: {err}"),
            SyncStep::ApplyStaticResources => err.to_string(),
            SyncStep::EnsureHubConfigSecret => format!(
                "Failed to ensure hub kubeconfig secret -n {namespace:?} {HUB_KUBECONFIG_SECRET:?}: {err}"
            ),
            SyncStep::ApplyRegistrationAgent => {
                format!("Failed to deploy registration deployment with error {err}")
            }
            SyncStep::ResolveClusterName => format!("Failed to resolve cluster name: {err}"),
            SyncStep::ApplyWorkAgent => format!("Failed to deploy work deployment with error {err}"),
        }
    }

    async fn ensure_namespace(&mut self) -> Result<(), ReconcilerError> {
        let namespace = DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "Namespace".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(self.config.klusterlet_namespace.clone()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        };
        apply_manifest(self.ctx.resources.as_ref(), &namespace)
            .await
            .map_err(ApplyError::from)?;
        Ok(())
    }

    async fn apply_static_resources(&mut self) -> Result<(), ReconcilerError> {
        let results = apply_directly(
            self.ctx.resources.as_ref(),
            self.ctx.renderer.as_ref(),
            &self.config,
            &STATIC_RESOURCE_FILES,
        )
        .await;
        match aggregate(results) {
            Some(errors) => Err(errors.into()),
            None => Ok(()),
        }
    }

    /// Create an empty hub kubeconfig secret so the work agent's secret
    /// volume can mount before the hub issues credentials
    async fn ensure_hub_config_secret(&mut self) -> Result<(), ReconcilerError> {
        let resources = self.ctx.resources.as_ref();
        let key = ResourceKey::secret(&self.config.klusterlet_namespace, HUB_KUBECONFIG_SECRET);
        let secret = match resources.get(&key).await.map_err(ApplyError::from)? {
            Some(secret) => secret,
            None => {
                let created = resources
                    .create(&placeholder_secret(&key))
                    .await
                    .map_err(ApplyError::from)?;
                info!(resource = %key, "Created placeholder hub kubeconfig secret");
                created
            }
        };
        self.hub_secret = Some(secret);
        Ok(())
    }

    async fn apply_workload(&mut self, file: &str) -> Result<(), ReconcilerError> {
        let ledger = self
            .klusterlet
            .status
            .as_ref()
            .map(|s| s.generations.as_slice())
            .unwrap_or_default();
        let entry = apply_deployment(
            self.ctx.resources.as_ref(),
            self.ctx.renderer.as_ref(),
            &self.config,
            ledger,
            &self.ctx.retry,
            file,
        )
        .await?;
        self.generations.push(entry);
        Ok(())
    }

    /// Fill in an undeclared cluster name from the hub kubeconfig secret
    ///
    /// Only the work agent sees the discovered name in this pass; the
    /// registration agent picks it up on the next one.
    fn resolve_cluster_name(&mut self) {
        if !self.config.cluster_name.is_empty() {
            return;
        }
        let Some(secret) = self.hub_secret.as_ref() else {
            return;
        };
        match read_cluster_name(secret) {
            Ok(Some(name)) => {
                debug!(
                    klusterlet = %self.config.klusterlet_name,
                    cluster = %name,
                    "Cluster name discovered from hub kubeconfig secret"
                );
                self.config.cluster_name = name;
            }
            Ok(None) => {}
            Err(e) => warn!(
                klusterlet = %self.config.klusterlet_name,
                error = %e,
                "Ignoring unreadable cluster name in hub kubeconfig secret"
            ),
        }
    }
}

fn placeholder_secret(key: &ResourceKey) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: key.api_version.clone(),
            kind: key.kind.clone(),
        }),
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: key.namespace.clone(),
            ..Default::default()
        },
        data: serde_json::json!({
            "type": "Opaque",
            "data": { "placeholder": STANDARD.encode("placeholder") },
        }),
    }
}

/// Cluster name stored in a secret, `None` when the key is absent
pub fn read_cluster_name(secret: &DynamicObject) -> Result<Option<String>, StoreError> {
    let Some(encoded) = secret
        .data
        .get("data")
        .and_then(|data| data.get(CLUSTER_NAME_SECRET_KEY))
        .and_then(|value| value.as_str())
    else {
        return Ok(None);
    };
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| StoreError::Invalid(format!("{CLUSTER_NAME_SECRET_KEY} is not base64: {e}")))?;
    let name = String::from_utf8(bytes)
        .map_err(|e| StoreError::Invalid(format!("{CLUSTER_NAME_SECRET_KEY} is not UTF-8: {e}")))?;
    Ok(Some(name))
}
