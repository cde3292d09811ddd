// packages/supervisor/src/utils/errors.rs
//! Error taxonomy for the supervisor
//!
//! - **MountError**: fatal to sandbox activation
//! - **StartupError**: fatal to the current ensure call
//! - **SyncError**: recoverable, logged and counted
//!
//! A key missing from the resolved environment is not an error and has no type.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Top-level supervisor error
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("storage mount failed: {0}")]
    Mount(#[from] MountError),

    #[error("gateway startup failed: {0}")]
    Startup(#[from] StartupError),

    #[error("storage sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),
}

impl From<config::ConfigError> for SupervisorError {
    fn from(err: config::ConfigError) -> Self {
        SupervisorError::Config(err.to_string())
    }
}

/// Binding the local directory to the bucket failed
#[derive(Debug, Error)]
pub enum MountError {
    #[error("mount helper '{program}' could not be started: {reason}")]
    HelperUnavailable { program: String, reason: String },

    #[error("mount of bucket '{bucket}' at {path:?} failed: {detail}")]
    MountFailed {
        bucket: String,
        path: PathBuf,
        detail: String,
    },

    #[error("failed to prepare mount point {path:?}: {source}")]
    MountPoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read mount table: {0}")]
    MountTable(#[source] std::io::Error),
}

/// The gateway process did not become ready
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("gateway command '{command}' could not be launched: {reason}")]
    Launch { command: String, reason: String },

    #[error("gateway (pid {pid}) not ready after {waited:?} waiting on {probe}")]
    Timeout {
        pid: u32,
        waited: Duration,
        probe: String,
    },

    #[error("gateway (pid {pid}) exited before becoming ready: {status}")]
    Exited { pid: u32, status: String },

    #[error("readiness wait for pid {pid} cancelled by sandbox teardown")]
    Cancelled { pid: u32 },
}

/// Pushing local state to the bucket failed
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage is not mounted at {0:?}")]
    NotMounted(PathBuf),

    #[error("refusing to sync: {0:?} is missing, local state looks uninitialized")]
    MissingSentinel(PathBuf),

    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid exclude pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("sync task failed: {0}")]
    Task(String),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}
