// packages/supervisor/src/runtime/handle.rs
//! Handle to the supervised gateway process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness state of a gateway process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Unknown,
    Starting,
    Ready,
    Dead,
}

impl Liveness {
    /// Starting or Ready; at most one such handle exists per sandbox
    pub fn is_active(&self) -> bool {
        matches!(self, Liveness::Starting | Liveness::Ready)
    }
}

/// How the supervisor came to hold the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Spawned by this supervisor
    Launched,
    /// Found already running in the process table
    Adopted,
}

/// Reference to a running gateway process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// Process ID
    pub pid: u32,

    /// Full command line as seen in the process table
    pub command_line: String,

    /// Current liveness
    pub liveness: Liveness,

    pub origin: Origin,

    /// When the supervisor first saw the process
    pub observed_at: DateTime<Utc>,
}

impl ProcessHandle {
    pub fn new(pid: u32, command_line: impl Into<String>, origin: Origin) -> Self {
        Self {
            pid,
            command_line: command_line.into(),
            liveness: Liveness::Unknown,
            origin,
            observed_at: Utc::now(),
        }
    }

    /// Same underlying process
    pub fn same_process(&self, other: &ProcessHandle) -> bool {
        self.pid == other.pid
    }

    pub(crate) fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }
}
