//! # Initialization
//!
//! Operator startup: rustls setup, tracing, metrics, server startup, and
//! Kubernetes client setup.

use crate::config::{ControllerConfig, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::Klusterlet;
use crate::observability;
use crate::store::KubeStore;
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Components needed to run the watch loop
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

/// Initialize the operator runtime
pub async fn initialize(
    controller_config: ControllerConfig,
    server_config: ServerConfig,
) -> Result<InitializationResult> {
    // Must run before any rustls connection is made
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "klusterlet_operator=info".into()),
        )
        .try_init()
    {
        warn!("Tracing subscriber already initialized: {}", e);
    }
    if !provider_installed {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting Klusterlet Operator v{}", env!("CARGO_PKG_VERSION"));
    info!(?controller_config, ?server_config, "Loaded configuration");
    server_config
        .validate()
        .context("Invalid server configuration")?;

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    check_crd_queryable(&client).await;

    let store = Arc::new(KubeStore::new(client.clone()));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store) as _,
        store,
        controller_config,
    ));

    info!("Operator initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = config.startup_timeout();
    let poll_interval = config.poll_interval();
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Log whether the Klusterlet CRD is installed
///
/// The watch loop retries on its own, so a missing CRD is not fatal here.
async fn check_crd_queryable(client: &Client) {
    let klusterlets: Api<Klusterlet> = Api::all(client.clone());
    match klusterlets.list(&ListParams::default().limit(1)).await {
        Ok(list) => info!(
            existing = list.items.len(),
            "Klusterlet CRD is queryable"
        ),
        Err(e) => warn!(
            error = %e,
            "Klusterlet CRD is not queryable yet, is it installed? Watch will keep retrying"
        ),
    }
}
