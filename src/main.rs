// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use binding_transport::{
    constants::{
        DEFAULT_MAX_NUM_WRAPPED, DEFAULT_MAX_SIZE_WRAPPED, DEFAULT_PROPERTY_NAMESPACE,
        DEFAULT_WORKERS, TOKIO_WORKER_THREADS,
    },
    controller::{self, ControllerConfig},
    transport::{manifestwork, transport_for_name},
};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Transport controller: propagates Bindings from a workload description space to
/// destination mailboxes as wrapped objects.
#[derive(Parser, Debug)]
#[command(name = "binding-transport", version, about, long_about = None)]
struct Cli {
    /// Name of the workload description space (WDS) this controller serves
    #[arg(long, env = "WDS_NAME")]
    wds_name: String,

    /// Max serialized size, in bytes, of the objects in one wrapped object
    #[arg(long, env = "MAX_SIZE_WRAPPED", default_value_t = DEFAULT_MAX_SIZE_WRAPPED)]
    max_size_wrapped: usize,

    /// Max number of objects in one wrapped object
    #[arg(long, env = "MAX_NUM_WRAPPED", default_value_t = DEFAULT_MAX_NUM_WRAPPED)]
    max_num_wrapped: usize,

    /// Number of concurrent workers
    #[arg(long, env = "WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Kind of wrapped object to produce
    #[arg(long, env = "TRANSPORT", default_value = manifestwork::TRANSPORT_NAME)]
    transport: String,

    /// Kubeconfig for the WDS; in-cluster or ambient config when omitted
    #[arg(long, env = "WDS_KUBECONFIG")]
    wds_kubeconfig: Option<PathBuf>,

    /// Kubeconfig for the inventory and transport space (ITS)
    #[arg(long, env = "ITS_KUBECONFIG")]
    its_kubeconfig: Option<PathBuf>,

    /// Namespace in the ITS holding per-destination property ConfigMaps
    #[arg(long, env = "PROPERTY_NAMESPACE", default_value = DEFAULT_PROPERTY_NAMESPACE)]
    property_namespace: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("transport-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

fn init_tracing() {
    // Respects RUST_LOG (default: info) and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    init_tracing();
    info!(wds = %cli.wds_name, "Starting Binding transport controller");

    let transport = transport_for_name(&cli.transport)?;

    debug!("Initializing Kubernetes clients");
    let wds_client = client_for(cli.wds_kubeconfig.as_deref())
        .await
        .context("failed to build WDS client")?;
    let its_client = client_for(cli.its_kubeconfig.as_deref())
        .await
        .context("failed to build ITS client")?;
    debug!("Kubernetes clients initialized successfully");

    let config = ControllerConfig {
        wds_name: cli.wds_name,
        max_size_wrapped: cli.max_size_wrapped,
        max_num_wrapped: cli.max_num_wrapped,
        workers: cli.workers,
        property_namespace: cli.property_namespace,
        transport,
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    if let Err(e) = controller::run(wds_client, its_client, config, cancel).await {
        error!(error = %e, "CRITICAL: transport controller failed");
        return Err(e.into());
    }
    info!("Transport controller stopped");
    Ok(())
}

/// Builds a client from a kubeconfig file, or from the ambient configuration.
async fn client_for(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };
    Ok(Client::try_from(config)?)
}

/// Cancels `token` on SIGINT or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }
    token.cancel();
}
