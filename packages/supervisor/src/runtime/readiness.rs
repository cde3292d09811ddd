// packages/supervisor/src/runtime/readiness.rs
//! Readiness polling for the gateway process
//!
//! A probe is polled at a fixed interval until it reports positive or the
//! maximum wait elapses. Interval and timeout come from configuration, never
//! from process state. Waits observe the sandbox cancellation token.

use crate::utils::config::{ProbeKind, ReadinessConfig};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound for a single probe attempt
const PROBE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// A pollable liveness signal
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// True once the gateway is ready
    async fn is_live(&self) -> bool;

    /// Human-readable description for logs and errors
    fn describe(&self) -> String;
}

/// Ready when a TCP connection to the port is accepted
pub struct PortProbe {
    addr: SocketAddr,
}

impl PortProbe {
    pub fn new(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        }
    }
}

#[async_trait]
impl LivenessProbe for PortProbe {
    async fn is_live(&self) -> bool {
        matches!(
            tokio::time::timeout(PROBE_ATTEMPT_TIMEOUT, TcpStream::connect(self.addr)).await,
            Ok(Ok(_))
        )
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.addr)
    }
}

/// Ready when the marker file exists and is non-empty
pub struct MarkerFileProbe {
    path: PathBuf,
}

impl MarkerFileProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LivenessProbe for MarkerFileProbe {
    async fn is_live(&self) -> bool {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => !content.trim().is_empty(),
            Err(_) => false,
        }
    }

    fn describe(&self) -> String {
        format!("marker {}", self.path.display())
    }
}

/// Build the configured probe
pub fn probe_from_config(config: &ReadinessConfig) -> Arc<dyn LivenessProbe> {
    match config.probe {
        ProbeKind::Port => Arc::new(PortProbe::new(config.port)),
        ProbeKind::MarkerFile => Arc::new(MarkerFileProbe::new(config.marker_file.clone())),
    }
}

/// Why a wait ended without a positive signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Probe turned positive after the given time
    Ready(Duration),
    /// Timeout elapsed
    TimedOut(Duration),
    /// Sandbox teardown
    Cancelled,
}

/// Polls a probe until ready, timeout or cancellation
#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    poll_interval: Duration,
    timeout: Duration,
}

impl ReadinessWaiter {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self::new(config.poll_interval(), config.timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn wait(&self, probe: &dyn LivenessProbe, cancel: &CancellationToken) -> WaitOutcome {
        let started = tokio::time::Instant::now();
        let deadline = started + self.timeout;

        loop {
            // An attempt never runs past the deadline
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                live = tokio::time::timeout(remaining, probe.is_live()) => live.unwrap_or(false),
            };

            if attempt {
                return WaitOutcome::Ready(started.elapsed());
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut(started.elapsed());
            }

            debug!("{} not ready yet, retrying in {:?}", probe.describe(), self.poll_interval);

            let next = (now + self.poll_interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = tokio::time::sleep_until(next) => {}
            }
        }
    }
}
