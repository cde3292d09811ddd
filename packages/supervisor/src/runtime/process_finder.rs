// packages/supervisor/src/runtime/process_finder.rs
//! Discovery of an already-running gateway in the process table
//!
//! Matching is by command line: an entry is the gateway when it carries one
//! of the gateway markers and none of the CLI markers. CLI invocations such as
//! `openclaw devices list` share the binary name and must not be mistaken for
//! a running gateway.

use crate::runtime::handle::{Liveness, Origin, ProcessHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, warn};

/// Scheduler state of a process table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Running,
    Zombie,
    Dead,
}

/// One row of a process table snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command_line: String,
    pub state: EntryState,
}

impl ProcessEntry {
    pub fn running(pid: u32, command_line: impl Into<String>) -> Self {
        Self {
            pid,
            command_line: command_line.into(),
            state: EntryState::Running,
        }
    }
}

/// Read access to the process table
pub trait ProcessTable: Send + Sync {
    /// Current entries; may be empty during cold start
    fn snapshot(&self) -> Vec<ProcessEntry>;
}

/// Process table backed by `sysinfo`
pub struct SysinfoProcessTable {
    system: Mutex<System>,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn snapshot(&self) -> Vec<ProcessEntry> {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let command_line = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                let state = match process.status() {
                    ProcessStatus::Zombie => EntryState::Zombie,
                    ProcessStatus::Dead => EntryState::Dead,
                    _ => EntryState::Running,
                };
                ProcessEntry {
                    pid: pid.as_u32(),
                    command_line,
                    state,
                }
            })
            .collect()
    }
}

/// Finds the gateway among the entries of a process table
pub struct ProcessFinder {
    table: Arc<dyn ProcessTable>,
    match_markers: Vec<String>,
    exclude_markers: Vec<String>,
    own_pid: u32,
}

impl ProcessFinder {
    pub fn new(table: Arc<dyn ProcessTable>, match_markers: Vec<String>, exclude_markers: Vec<String>) -> Self {
        Self {
            table,
            match_markers,
            exclude_markers,
            own_pid: std::process::id(),
        }
    }

    /// Whether a command line belongs to the gateway
    pub fn is_gateway_command(&self, command_line: &str) -> bool {
        let matched = self
            .match_markers
            .iter()
            .any(|marker| command_line.contains(marker.as_str()));
        let excluded = self
            .exclude_markers
            .iter()
            .any(|marker| command_line.contains(marker.as_str()));
        matched && !excluded
    }

    /// Return the running gateway, if any. Zombie and dead entries are never
    /// returned; the handle's liveness is left Unknown for the caller to probe.
    pub fn find(&self) -> Option<ProcessHandle> {
        let mut candidates: Vec<ProcessEntry> = self
            .table
            .snapshot()
            .into_iter()
            .filter(|entry| entry.pid != self.own_pid)
            .filter(|entry| self.is_gateway_command(&entry.command_line))
            .filter(|entry| {
                if entry.state != EntryState::Running {
                    debug!("Ignoring {:?} gateway entry (PID {})", entry.state, entry.pid);
                    return false;
                }
                true
            })
            .collect();

        candidates.sort_by_key(|entry| entry.pid);

        if candidates.len() > 1 {
            let pids: Vec<u32> = candidates.iter().map(|entry| entry.pid).collect();
            warn!("Multiple gateway processes found: {:?}, using PID {}", pids, pids[0]);
        }

        candidates
            .into_iter()
            .next()
            .map(|entry| ProcessHandle::new(entry.pid, entry.command_line, Origin::Adopted))
    }

    /// Liveness of a specific pid as far as the table can tell
    pub fn table_liveness(&self, pid: u32) -> Liveness {
        match self.table.snapshot().into_iter().find(|entry| entry.pid == pid) {
            Some(entry) if entry.state == EntryState::Running => Liveness::Unknown,
            _ => Liveness::Dead,
        }
    }
}
