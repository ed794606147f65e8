//! # Manifests
//!
//! Rendering of the klusterlet manifests embedded in the binary.
//!
//! Templates are minijinja documents using `{{ parameter }}` placeholders
//! filled from a `KlusterletConfig`. Undefined parameters are rejected, so an
//! unknown template or placeholder is a defect in the shipped manifests,
//! never an operational condition.

use crate::constants::{BOOTSTRAP_HUB_KUBECONFIG_SECRET, HUB_KUBECONFIG_SECRET};
use crate::crd::Klusterlet;
use kube::ResourceExt;
use minijinja::{context, AutoEscape, Environment, UndefinedBehavior};
use thiserror::Error;

pub const REGISTRATION_DEPLOYMENT: &str = "klusterlet-registration-deployment.yaml";
pub const WORK_DEPLOYMENT: &str = "klusterlet-work-deployment.yaml";

/// Static manifests in apply order; cleanup deletes them in the same order
pub const STATIC_RESOURCE_FILES: [&str; 9] = [
    "klusterlet-registration-serviceaccount.yaml",
    "klusterlet-registration-clusterrole.yaml",
    "klusterlet-registration-clusterrolebinding.yaml",
    "klusterlet-registration-role.yaml",
    "klusterlet-registration-rolebinding.yaml",
    "klusterlet-work-serviceaccount.yaml",
    "klusterlet-work-clusterrole.yaml",
    "klusterlet-work-clusterrolebinding.yaml",
    "klusterlet-work-clusterrolebinding-addition.yaml",
];

const MANIFESTS: [(&str, &str); 11] = [
    (
        "klusterlet-registration-serviceaccount.yaml",
        include_str!("../../manifests/klusterlet/klusterlet-registration-serviceaccount.yaml"),
    ),
    (
        "klusterlet-registration-clusterrole.yaml",
        include_str!("../../manifests/klusterlet/klusterlet-registration-clusterrole.yaml"),
    ),
    (
        "klusterlet-registration-clusterrolebinding.yaml",
        include_str!("../../manifests/klusterlet/klusterlet-registration-clusterrolebinding.yaml"),
    ),
    (
        "klusterlet-registration-role.yaml",
        include_str!("../../manifests/klusterlet/klusterlet-registration-role.yaml"),
    ),
    (
        "klusterlet-registration-rolebinding.yaml",
        include_str!("../../manifests/klusterlet/klusterlet-registration-rolebinding.yaml"),
    ),
    (
        "klusterlet-work-serviceaccount.yaml",
        include_str!("../../manifests/klusterlet/klusterlet-work-serviceaccount.yaml"),
    ),
    (
        "klusterlet-work-clusterrole.yaml",
        include_str!("../../manifests/klusterlet/klusterlet-work-clusterrole.yaml"),
    ),
    (
        "klusterlet-work-clusterrolebinding.yaml",
        include_str!("../../manifests/klusterlet/klusterlet-work-clusterrolebinding.yaml"),
    ),
    (
        "klusterlet-work-clusterrolebinding-addition.yaml",
        include_str!("../../manifests/klusterlet/klusterlet-work-clusterrolebinding-addition.yaml"),
    ),
    (
        REGISTRATION_DEPLOYMENT,
        include_str!("../../manifests/klusterlet/klusterlet-registration-deployment.yaml"),
    ),
    (
        WORK_DEPLOYMENT,
        include_str!("../../manifests/klusterlet/klusterlet-work-deployment.yaml"),
    ),
];

/// Rendering failures
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown manifest {0:?}")]
    UnknownManifest(String),
    #[error("failed to render manifest {manifest:?}: {source}")]
    Template {
        manifest: String,
        #[source]
        source: minijinja::Error,
    },
}

impl RenderError {
    fn template(manifest: &str) -> impl FnOnce(minijinja::Error) -> Self + '_ {
        move |source| RenderError::Template {
            manifest: manifest.to_string(),
            source,
        }
    }
}

/// Parameters the klusterlet manifests are rendered with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlusterletConfig {
    pub klusterlet_name: String,
    pub klusterlet_namespace: String,
    pub registration_image: String,
    pub work_image: String,
    /// May be empty until discovered from the hub kubeconfig secret
    pub cluster_name: String,
    pub external_server_urls: String,
    pub hub_kubeconfig_secret: String,
    pub bootstrap_hub_kubeconfig_secret: String,
}

impl KlusterletConfig {
    pub fn from_klusterlet(klusterlet: &Klusterlet) -> Self {
        Self {
            klusterlet_name: klusterlet.name_any(),
            klusterlet_namespace: klusterlet.effective_namespace().to_string(),
            registration_image: klusterlet.spec.registration_image_pull_spec.clone(),
            work_image: klusterlet.spec.work_image_pull_spec.clone(),
            cluster_name: klusterlet.declared_cluster_name().unwrap_or_default().to_string(),
            external_server_urls: klusterlet.external_server_urls(),
            hub_kubeconfig_secret: HUB_KUBECONFIG_SECRET.to_string(),
            bootstrap_hub_kubeconfig_secret: BOOTSTRAP_HUB_KUBECONFIG_SECRET.to_string(),
        }
    }

    fn context(&self) -> minijinja::Value {
        context! {
            klusterlet_name => self.klusterlet_name,
            klusterlet_namespace => self.klusterlet_namespace,
            registration_image => self.registration_image,
            work_image => self.work_image,
            cluster_name => self.cluster_name,
            external_server_urls => self.external_server_urls,
            hub_kubeconfig_secret => self.hub_kubeconfig_secret,
            bootstrap_hub_kubeconfig_secret => self.bootstrap_hub_kubeconfig_secret,
        }
    }
}

/// Turns a manifest name and parameters into a YAML document
pub trait ManifestRenderer: Send + Sync {
    fn render(&self, name: &str, config: &KlusterletConfig) -> Result<Vec<u8>, RenderError>;
}

/// Renderer over the manifests compiled into the binary
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedManifests;

impl ManifestRenderer for EmbeddedManifests {
    fn render(&self, name: &str, config: &KlusterletConfig) -> Result<Vec<u8>, RenderError> {
        let source = MANIFESTS
            .iter()
            .find(|(file, _)| *file == name)
            .map(|(_, template)| *template)
            .ok_or_else(|| RenderError::UnknownManifest(name.to_string()))?;
        render_template(name, source, config).map(String::into_bytes)
    }
}

/// Render one template with strict undefined handling and no escaping
fn render_template(
    name: &str,
    source: &str,
    config: &KlusterletConfig,
) -> Result<String, RenderError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.add_template(name, source)
        .map_err(RenderError::template(name))?;
    env.get_template(name)
        .and_then(|template| template.render(config.context()))
        .map_err(RenderError::template(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::DynamicObject;

    fn config() -> KlusterletConfig {
        KlusterletConfig {
            klusterlet_name: "demo".to_string(),
            klusterlet_namespace: "agents".to_string(),
            registration_image: "quay.io/ocm/registration:v1".to_string(),
            work_image: "quay.io/ocm/work:v1".to_string(),
            cluster_name: "east-1".to_string(),
            external_server_urls: "https://a:6443".to_string(),
            hub_kubeconfig_secret: HUB_KUBECONFIG_SECRET.to_string(),
            bootstrap_hub_kubeconfig_secret: BOOTSTRAP_HUB_KUBECONFIG_SECRET.to_string(),
        }
    }

    #[test]
    fn test_every_manifest_renders_to_a_named_object() {
        for (name, _) in MANIFESTS {
            let bytes = EmbeddedManifests.render(name, &config()).unwrap();
            let obj: DynamicObject = serde_yaml::from_slice(&bytes)
                .unwrap_or_else(|e| panic!("{name} is not a valid object: {e}"));
            assert!(obj.types.is_some(), "{name} has no type");
            assert!(obj.metadata.name.is_some(), "{name} has no name");
        }
    }

    #[test]
    fn test_deployment_names_follow_convention() {
        let registration: DynamicObject =
            serde_yaml::from_slice(&EmbeddedManifests.render(REGISTRATION_DEPLOYMENT, &config()).unwrap())
                .unwrap();
        let work: DynamicObject =
            serde_yaml::from_slice(&EmbeddedManifests.render(WORK_DEPLOYMENT, &config()).unwrap()).unwrap();

        assert_eq!(registration.metadata.name.as_deref(), Some("demo-registration-agent"));
        assert_eq!(work.metadata.name.as_deref(), Some("demo-work-agent"));
        assert_eq!(work.metadata.namespace.as_deref(), Some("agents"));
    }

    #[test]
    fn test_unknown_manifest() {
        assert!(matches!(
            EmbeddedManifests.render("nope.yaml", &config()),
            Err(RenderError::UnknownManifest(name)) if name == "nope.yaml"
        ));
    }

    #[test]
    fn test_undefined_parameter_is_rejected() {
        let err = render_template("t.yaml", "name: {{ missing }}", &config()).unwrap_err();
        match err {
            RenderError::Template { manifest, source } => {
                assert_eq!(manifest, "t.yaml");
                assert_eq!(source.kind(), minijinja::ErrorKind::UndefinedError);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unterminated_placeholder_is_rejected() {
        let err = render_template("t.yaml", "name: {{ klusterlet_name", &config()).unwrap_err();
        assert!(matches!(err, RenderError::Template { .. }));
    }

    #[test]
    fn test_empty_value_renders_empty() {
        let mut cfg = config();
        cfg.cluster_name = String::new();
        let out = render_template("t.yaml", "- --cluster-name={{ cluster_name }}", &cfg).unwrap();
        assert_eq!(out, "- --cluster-name=");
    }

    #[test]
    fn test_values_are_not_escaped() {
        let mut cfg = config();
        cfg.external_server_urls = "https://a:6443,https://b:6443?x=1&y=<2>".to_string();
        let out = render_template("t.yaml", "{{ external_server_urls }}", &cfg).unwrap();
        assert_eq!(out, cfg.external_server_urls);
    }
}
