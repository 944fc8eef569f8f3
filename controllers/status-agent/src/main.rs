//! Status Agent
//!
//! Runs on a managed cluster and mirrors the status of every object that a
//! hub ManifestWork applied there into a WorkStatus record on the hub:
//! - AppliedManifestWork records say which objects are applied
//! - a watch is kept per kind while any applied object of that kind exists
//! - object changes are queued and projected into WorkStatus records

mod applied_set;
mod backoff;
mod config;
mod controller;
mod discovery;
mod error;
mod keys;
mod object;
mod projector;
mod queue;
mod reconciler;
mod registry;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::AgentConfig;
use crate::error::ControllerError;
use controller::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting Status Agent");

    let config = AgentConfig::from_env()?;
    info!("Configuration:");
    info!("  Cluster: {}", config.cluster_name);
    info!("  Addon: {}", config.addon_name);
    info!("  Hub kubeconfig: {}", config.hub_kubeconfig);
    info!("  Workers: {}", config.workers);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let controller = Controller::new(config).await?;
    if let Err(e) = controller.run(shutdown).await {
        error!("Status agent failed: {}", e);
        return Err(e);
    }

    info!("Status agent stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
