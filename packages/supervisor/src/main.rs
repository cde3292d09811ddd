// packages/supervisor/src/main.rs
//! Sandbox Gateway Supervisor
//!
//! Activates the sandbox (environment, storage, gateway), then waits for a
//! shutdown signal and tears down with a final state sync.

use anyhow::{Context, Result};
use sandbox_supervisor::observability::{init_metrics, init_tracing};
use sandbox_supervisor::runtime::FinalSync;
use sandbox_supervisor::{RawConfig, Sandbox, SupervisorConfig};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = SupervisorConfig::load().context("failed to load supervisor configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!("Starting sandbox supervisor v{}", sandbox_supervisor::VERSION);

    let raw = RawConfig::from_env();
    let sandbox = match Sandbox::activate(config, &raw).await {
        Ok(sandbox) => sandbox,
        Err(e) => {
            error!("Sandbox activation failed: {}", e);
            return Err(e.into());
        }
    };

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let report = sandbox.teardown().await;
    match report.final_sync {
        FinalSync::Synced(sync) => info!("Final sync copied {} files", sync.files_copied),
        FinalSync::Failed(reason) => warn!("Final sync failed, state may be lost: {}", reason),
        FinalSync::NotConfigured => info!("No storage configured, nothing to sync"),
    }

    info!("Supervisor stopped");
    Ok(())
}
