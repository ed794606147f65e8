//! # Custom Resource Definitions
//!
//! CRD types for the Klusterlet operator.
//!
//! A `Klusterlet` describes the agents that connect a managed cluster to its
//! hub: which images to run, which namespace to run them in and how to reach
//! the hub.

mod status;

pub use status::*;

use crate::controller::reconciler::routing::effective_namespace;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Klusterlet Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: operator.open-cluster-management.io/v1
/// kind: Klusterlet
/// metadata:
///   name: klusterlet
/// spec:
///   registrationImagePullSpec: quay.io/open-cluster-management/registration
///   workImagePullSpec: quay.io/open-cluster-management/work
///   clusterName: cluster1
///   namespace: open-cluster-management-agent
///   externalServerURLs:
///     - url: https://localhost
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[kube(
    kind = "Klusterlet",
    group = "operator.open-cluster-management.io",
    version = "v1",
    status = "KlusterletStatus",
    shortname = "klusterlet",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}, {"name":"Applied", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Applied\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KlusterletSpec {
    /// Namespace the agents are deployed into
    /// Defaults to open-cluster-management-agent when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Image of the registration agent
    pub registration_image_pull_spec: String,
    /// Image of the work agent
    pub work_image_pull_spec: String,
    /// Name of this cluster on the hub
    /// When empty, the name is discovered from the hub kubeconfig secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    /// API server URLs of this cluster as reachable from the hub
    #[serde(default, rename = "externalServerURLs")]
    pub external_server_urls: Vec<ServerUrl>,
}

/// An externally reachable API server endpoint
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerUrl {
    /// URL of the API server
    pub url: String,
    /// Base64 encoded CA bundle for the URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

impl Klusterlet {
    /// Namespace the agents of this Klusterlet live in
    pub fn effective_namespace(&self) -> &str {
        effective_namespace(self.spec.namespace.as_deref())
    }

    /// Declared cluster name, treating an empty string as unset
    pub fn declared_cluster_name(&self) -> Option<&str> {
        self.spec.cluster_name.as_deref().filter(|name| !name.is_empty())
    }

    /// External server URLs joined the way the registration agent expects them
    pub fn external_server_urls(&self) -> String {
        self.spec
            .external_server_urls
            .iter()
            .map(|server| server.url.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the given finalizer is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::KLUSTERLET_DEFAULT_NAMESPACE;

    fn klusterlet(namespace: Option<&str>) -> Klusterlet {
        Klusterlet::new(
            "demo",
            KlusterletSpec {
                namespace: namespace.map(str::to_string),
                registration_image_pull_spec: "registration:latest".to_string(),
                work_image_pull_spec: "work:latest".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_effective_namespace_defaults() {
        assert_eq!(klusterlet(None).effective_namespace(), KLUSTERLET_DEFAULT_NAMESPACE);
        assert_eq!(klusterlet(Some("")).effective_namespace(), KLUSTERLET_DEFAULT_NAMESPACE);
        assert_eq!(klusterlet(Some("agents")).effective_namespace(), "agents");
    }

    #[test]
    fn test_external_server_urls_joined() {
        let mut k = klusterlet(None);
        assert_eq!(k.external_server_urls(), "");

        k.spec.external_server_urls = vec![
            ServerUrl {
                url: "https://a:6443".to_string(),
                ca_bundle: None,
            },
            ServerUrl {
                url: "https://b:6443".to_string(),
                ca_bundle: Some("Y2E=".to_string()),
            },
        ];
        assert_eq!(k.external_server_urls(), "https://a:6443,https://b:6443");
    }

    #[test]
    fn test_spec_deserializes_from_camel_case() {
        let spec: KlusterletSpec = serde_json::from_value(serde_json::json!({
            "registrationImagePullSpec": "reg",
            "workImagePullSpec": "work",
            "clusterName": "",
            "externalServerURLs": [{"url": "https://hub"}]
        }))
        .unwrap();
        assert_eq!(spec.external_server_urls.len(), 1);
        assert_eq!(spec.cluster_name.as_deref(), Some(""));

        let k = Klusterlet::new("demo", spec);
        assert_eq!(k.declared_cluster_name(), None);
    }
}
