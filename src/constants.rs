//! # Constants
//!
//! Well-known names and default values shared across the operator.
//!
//! The naming constants are part of the contract with the agents and with
//! existing clusters; changing any of them orphans resources created by
//! earlier versions.

/// Finalizer placed on every Klusterlet before any dependent is created
pub const KLUSTERLET_FINALIZER: &str = "operator.open-cluster-management.io/klusterlet-cleanup";

/// Condition type reporting whether all klusterlet components were applied
pub const KLUSTERLET_APPLIED: &str = "Applied";

/// Condition reason for a fully applied pass
pub const REASON_APPLIED: &str = "KlusterletApplied";

/// Condition reason for any failed step of an apply pass
pub const REASON_APPLY_FAILED: &str = "KlusterletApplyFailed";

/// Namespace used when a Klusterlet does not declare one
pub const KLUSTERLET_DEFAULT_NAMESPACE: &str = "open-cluster-management-agent";

/// Secret holding the hub kubeconfig issued to the registration agent
pub const HUB_KUBECONFIG_SECRET: &str = "hub-config";

/// Secret holding the bootstrap kubeconfig used for the first registration
pub const BOOTSTRAP_HUB_KUBECONFIG_SECRET: &str = "bootstrap-hub-config";

/// Key in the hub kubeconfig secret that carries the registered cluster name
pub const CLUSTER_NAME_SECRET_KEY: &str = "cluster-name";

/// Suffix of the registration agent Deployment name
pub const REGISTRATION_AGENT_SUFFIX: &str = "-registration-agent";

/// Suffix of the work agent Deployment name
pub const WORK_AGENT_SUFFIX: &str = "-work-agent";

/// Field manager name for status writes
pub const FIELD_MANAGER: &str = "klusterlet-operator";

// Server defaults
pub const DEFAULT_METRICS_PORT: u16 = 8080;
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

// Controller defaults
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONFLICT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONFLICT_RETRY_INITIAL_DELAY_MS: u64 = 50;
pub const DEFAULT_CONFLICT_RETRY_MAX_DELAY_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
pub const DEFAULT_CONTROLLER_CONCURRENCY: u16 = 4;
