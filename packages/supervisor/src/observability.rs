// packages/supervisor/src/observability.rs
//! Logging and metrics setup

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{Result, SupervisorError};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| SupervisorError::Config(format!("invalid log filter '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json().with_current_span(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|e| SupervisorError::RuntimeError(format!("failed to install tracing subscriber: {}", e)))
}

/// Install the Prometheus exporter when a listen address is configured
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    let Some(addr) = &config.listen_addr else {
        return Ok(());
    };

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| SupervisorError::Config(format!("invalid metrics listen address '{}': {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| SupervisorError::RuntimeError(format!("failed to install metrics exporter: {}", e)))?;

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}
