//! # Klusterlet Status
//!
//! Status types for tracking reconciliation state, conditions and the
//! generation ledger of applied workloads.

use kube::api::DynamicObject;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of the Klusterlet resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KlusterletStatus {
    /// Spec generation observed by the last fully successful apply pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Conditions represent the latest available observations
    /// At most one condition per type is kept
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Last generation of each workload written by the operator
    #[serde(default)]
    pub generations: Vec<GenerationStatus>,
}

impl KlusterletStatus {
    /// Condition of the given type, if present
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == type_)
    }
}

/// Tri-state status of a condition
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition represents one observed aspect of the Klusterlet
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Last time the status value changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: type_.into(),
            status,
            last_transition_time: None,
            reason: Some(reason.into()),
            message: Some(message.into()),
        }
    }
}

/// Last generation the operator observed for one workload it wrote
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    /// API group of the workload ("apps" for Deployments)
    #[serde(default)]
    pub group: String,
    /// API version of the workload
    pub version: String,
    /// Plural resource name ("deployments")
    pub resource: String,
    /// Namespace of the workload
    #[serde(default)]
    pub namespace: String,
    /// Name of the workload
    pub name: String,
    /// Generation assigned by the API server on the last accepted write
    pub last_generation: i64,
}

impl GenerationStatus {
    /// Ledger entry for a live object as returned by the store
    ///
    /// Returns `None` when the object has no type information or the store
    /// did not assign it a generation.
    pub fn for_object(obj: &DynamicObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), types.api_version.clone()),
        };
        Some(Self {
            group,
            version,
            resource: format!("{}s", types.kind.to_lowercase()),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone()?,
            last_generation: obj.metadata.generation?,
        })
    }

    fn same_target(&self, other: &GenerationStatus) -> bool {
        self.group == other.group
            && self.resource == other.resource
            && self.namespace == other.namespace
            && self.name == other.name
    }
}

/// Look up a ledger entry by target
pub fn find_generation<'a>(
    generations: &'a [GenerationStatus],
    group: &str,
    resource: &str,
    namespace: &str,
    name: &str,
) -> Option<&'a GenerationStatus> {
    generations.iter().find(|g| {
        g.group == group && g.resource == resource && g.namespace == namespace && g.name == name
    })
}

/// Merge ledger entries, replacing entries for the same target
pub fn set_generation(generations: &mut Vec<GenerationStatus>, entry: GenerationStatus) {
    match generations.iter_mut().find(|g| g.same_target(&entry)) {
        Some(existing) => *existing = entry,
        None => generations.push(entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::{ObjectMeta, TypeMeta};

    fn deployment(name: &str, generation: Option<i64>) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("agents".to_string()),
                generation,
                ..Default::default()
            },
            data: serde_json::json!({}),
        }
    }

    #[test]
    fn test_generation_status_for_deployment() {
        let entry = GenerationStatus::for_object(&deployment("demo-work-agent", Some(3))).unwrap();
        assert_eq!(entry.group, "apps");
        assert_eq!(entry.version, "v1");
        assert_eq!(entry.resource, "deployments");
        assert_eq!(entry.namespace, "agents");
        assert_eq!(entry.last_generation, 3);
    }

    #[test]
    fn test_generation_status_requires_generation() {
        assert!(GenerationStatus::for_object(&deployment("demo-work-agent", None)).is_none());
    }

    #[test]
    fn test_set_generation_replaces_same_target() {
        let mut ledger = vec![];
        set_generation(
            &mut ledger,
            GenerationStatus::for_object(&deployment("a", Some(1))).unwrap(),
        );
        set_generation(
            &mut ledger,
            GenerationStatus::for_object(&deployment("b", Some(1))).unwrap(),
        );
        set_generation(
            &mut ledger,
            GenerationStatus::for_object(&deployment("a", Some(2))).unwrap(),
        );

        assert_eq!(ledger.len(), 2);
        assert_eq!(
            find_generation(&ledger, "apps", "deployments", "agents", "a").map(|g| g.last_generation),
            Some(2)
        );
    }

    #[test]
    fn test_condition_status_serializes_as_string() {
        let condition = Condition::new("Applied", ConditionStatus::True, "KlusterletApplied", "ok");
        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value["status"], "True");
        assert_eq!(value["type"], "Applied");
    }
}
