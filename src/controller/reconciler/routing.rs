//! # Event Routing
//!
//! Maps change notifications for dependents back to the Klusterlet that owns
//! them.
//!
//! Ownership is never stored on the dependents. It is derived from the naming
//! convention:
//! - Secrets `hub-config` and `bootstrap-hub-config` in a Klusterlet's agent
//!   namespace belong to that Klusterlet
//! - Deployments `<name>-registration-agent` and `<name>-work-agent` in the
//!   agent namespace of Klusterlet `<name>` belong to it
//!
//! Everything else is dropped.

use crate::constants::{
    BOOTSTRAP_HUB_KUBECONFIG_SECRET, HUB_KUBECONFIG_SECRET, KLUSTERLET_DEFAULT_NAMESPACE,
    REGISTRATION_AGENT_SUFFIX, WORK_AGENT_SUFFIX,
};
use crate::crd::Klusterlet;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::sync::Arc;

/// Kind of object a change notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Secret,
    Deployment,
    Klusterlet,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Secret => "Secret",
            ChangeKind::Deployment => "Deployment",
            ChangeKind::Klusterlet => "Klusterlet",
        }
    }
}

/// A watched object changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub name: String,
    pub namespace: Option<String>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.map(str::to_string),
        }
    }

    pub fn from_meta(kind: ChangeKind, meta: &ObjectMeta) -> Self {
        Self {
            kind,
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
        }
    }
}

/// Name of the registration agent Deployment of a Klusterlet
pub fn registration_agent_name(klusterlet: &str) -> String {
    format!("{klusterlet}{REGISTRATION_AGENT_SUFFIX}")
}

/// Name of the work agent Deployment of a Klusterlet
pub fn work_agent_name(klusterlet: &str) -> String {
    format!("{klusterlet}{WORK_AGENT_SUFFIX}")
}

/// Agent namespace for a declared namespace, empty meaning the default
pub fn effective_namespace(declared: Option<&str>) -> &str {
    match declared {
        Some(ns) if !ns.is_empty() => ns,
        _ => KLUSTERLET_DEFAULT_NAMESPACE,
    }
}

/// Klusterlet owning a dependent, derived from names only
///
/// Klusterlet events are not dependents and always yield `None` here.
pub fn owner_of(
    kind: ChangeKind,
    name: &str,
    namespace: Option<&str>,
    klusterlets: &[Arc<Klusterlet>],
) -> Option<String> {
    let namespace = namespace?;
    match kind {
        ChangeKind::Secret => {
            if name != HUB_KUBECONFIG_SECRET && name != BOOTSTRAP_HUB_KUBECONFIG_SECRET {
                return None;
            }
            klusterlets
                .iter()
                .find(|k| k.effective_namespace() == namespace)
                .map(|k| k.name_any())
        }
        ChangeKind::Deployment => klusterlets
            .iter()
            .find(|k| {
                let owner = k.name_any();
                k.effective_namespace() == namespace
                    && (name == registration_agent_name(&owner) || name == work_agent_name(&owner))
            })
            .map(|k| k.name_any()),
        ChangeKind::Klusterlet => None,
    }
}

/// Queue key for a change event, `None` when the event is irrelevant
pub fn route(event: &ChangeEvent, klusterlets: &[Arc<Klusterlet>]) -> Option<String> {
    match event.kind {
        ChangeKind::Klusterlet => Some(event.name.clone()),
        kind => owner_of(kind, &event.name, event.namespace.as_deref(), klusterlets),
    }
}
