// packages/supervisor/src/utils/config.rs
//! Supervisor configuration
//!
//! Loaded from an optional TOML file overlaid by `SUPERVISOR__*` environment
//! variables. Every field has a default, so an empty environment is valid.

use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "SUPERVISOR_CONFIG";

/// Config file used when `SUPERVISOR_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "supervisor.toml";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub gateway: GatewayConfig,
    pub readiness: ReadinessConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl SupervisorConfig {
    /// Load from the file named by `SUPERVISOR_CONFIG` (or the default path)
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load from an explicit file path; a missing file is not an error
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("SUPERVISOR")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("gateway.match_markers")
                    .with_list_parse_key("gateway.exclude_markers")
                    .with_list_parse_key("gateway.args")
                    .with_list_parse_key("gateway.inherit_env")
                    .with_list_parse_key("storage.exclude")
                    .try_parsing(true)
                    .source(Some(crate::env::utf8_vars().collect())),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// How the bot gateway process is launched and recognised
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Program started for a fresh gateway
    pub command: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Working directory for the process
    pub work_dir: Option<PathBuf>,

    /// Command-line fragments identifying a gateway process
    pub match_markers: Vec<String>,

    /// Command-line fragments of CLI invocations that are never the gateway
    pub exclude_markers: Vec<String>,

    /// Supervisor variables copied into the otherwise empty gateway environment
    pub inherit_env: Vec<String>,

    /// Grace period between SIGTERM and SIGKILL
    pub stop_grace_secs: u64,

    /// Terminate the gateway when the sandbox is torn down
    pub stop_on_teardown: bool,

    /// Re-run ensure on this interval (0 disables the watchdog)
    pub watchdog_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            command: "/usr/local/bin/start-openclaw.sh".to_string(),
            args: vec![],
            work_dir: None,
            match_markers: vec![
                "start-openclaw.sh".to_string(),
                "openclaw gateway".to_string(),
            ],
            exclude_markers: vec![
                "openclaw devices".to_string(),
                "openclaw --version".to_string(),
            ],
            inherit_env: vec!["PATH".to_string(), "HOME".to_string(), "LANG".to_string()],
            stop_grace_secs: 2,
            stop_on_teardown: true,
            watchdog_interval_secs: 0,
        }
    }
}

impl GatewayConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn watchdog_interval(&self) -> Option<Duration> {
        (self.watchdog_interval_secs > 0).then(|| Duration::from_secs(self.watchdog_interval_secs))
    }
}

/// Liveness signal selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// TCP accept on 127.0.0.1:<port>
    Port,
    /// Marker file exists and is non-empty
    MarkerFile,
}

/// Readiness polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub probe: ProbeKind,

    /// Port the gateway listens on
    pub port: u16,

    /// Marker file written by the gateway once started
    pub marker_file: PathBuf,

    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Maximum wait in seconds
    pub timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            probe: ProbeKind::Port,
            port: 18789,
            marker_file: PathBuf::from("/tmp/openclaw-gateway.ready"),
            poll_interval_ms: 500,
            timeout_secs: 180,
        }
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Object storage binding and sync
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local path the bucket is mounted at
    pub mount_path: PathBuf,

    /// Sub-directory of the bucket holding the bot state
    pub prefix: String,

    /// Bucket used when `R2_BUCKET_NAME` is absent
    pub default_bucket: String,

    /// Endpoint template, `{account_id}` is substituted
    pub endpoint_template: String,

    /// FUSE helper used to mount the bucket
    pub mount_program: String,

    /// Bot state directory that is synced
    pub state_dir: PathBuf,

    /// File that must exist in the state directory before syncing
    pub sentinel_file: String,

    /// Glob patterns never synced
    pub exclude: Vec<String>,

    /// Periodic sync interval in seconds
    pub sync_interval_secs: u64,

    /// Restore state from the bucket before launch
    pub restore_on_activate: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mount_path: PathBuf::from("/data/openclaw"),
            prefix: "openclaw".to_string(),
            default_bucket: "openclaw-data".to_string(),
            endpoint_template: "https://{account_id}.r2.cloudflarestorage.com".to_string(),
            mount_program: "s3fs".to_string(),
            state_dir: PathBuf::from("/root/.openclaw"),
            sentinel_file: "openclaw.json".to_string(),
            exclude: vec!["*.lock".to_string(), "*.log".to_string(), "*.tmp".to_string()],
            sync_interval_secs: 300,
            restore_on_activate: true,
        }
    }
}

impl StorageConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

/// Prometheus exporter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Listen address for the scrape endpoint; unset disables the exporter
    pub listen_addr: Option<String>,
}
