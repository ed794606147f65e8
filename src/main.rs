//! # Klusterlet Operator
//!
//! Entry point: loads configuration, applies command-line overrides and runs
//! the controller until a shutdown signal arrives.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (default)
//! klusterlet-operator run --metrics-port 9090 --concurrency 8
//!
//! # Print the Klusterlet CRD
//! klusterlet-operator crd
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use klusterlet_operator::config::load_config;
use klusterlet_operator::crd::Klusterlet;
use klusterlet_operator::runtime::initialization::initialize;
use klusterlet_operator::runtime::watch_loop::run_watch_loop;
use kube::CustomResourceExt;

#[derive(Parser, Debug)]
#[command(name = "klusterlet-operator")]
#[command(about = "Kubernetes operator for the klusterlet agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the operator (default)
    Run(RunArgs),
    /// Print the Klusterlet CustomResourceDefinition as YAML
    Crd,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Port for metrics and health endpoints (overrides METRICS_PORT)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Klusterlets reconciled in parallel (overrides CONTROLLER_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => run(args).await,
        Command::Crd => {
            let crd = serde_yaml::to_string(&Klusterlet::crd())
                .context("Failed to serialize Klusterlet CRD")?;
            print!("{crd}");
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let (mut controller_config, mut server_config) = load_config();
    if let Some(port) = args.metrics_port {
        server_config.metrics_port = port;
    }
    if let Some(concurrency) = args.concurrency {
        controller_config.concurrency = concurrency;
    }

    let init_result = initialize(controller_config, server_config).await?;

    run_watch_loop(
        init_result.client,
        init_result.reconciler,
        init_result.server_state,
    )
    .await
}
