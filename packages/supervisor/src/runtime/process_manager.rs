// packages/supervisor/src/runtime/process_manager.rs
//! Process manager for launching and stopping the gateway process
//!
//! - Resolves the gateway command on PATH
//! - Spawns it with a cleared environment: the resolved variables plus a
//!   small allowlist copied from the supervisor (`PATH`, `HOME`, ...)
//! - Forwards stdout/stderr lines into tracing
//! - Terminates with SIGTERM, escalating to SIGKILL

use crate::env::ResolvedEnv;
use crate::utils::errors::StartupError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// What to launch
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Program name or path
    pub command: String,

    /// Arguments
    pub args: Vec<String>,

    /// Working directory
    pub work_dir: Option<PathBuf>,

    /// Supervisor variables copied into the child; everything else is dropped
    pub inherit_env: Vec<String>,
}

/// A freshly launched gateway
pub struct LaunchedProcess {
    pub pid: u32,

    /// Command line as launched
    pub command_line: String,

    /// Child to reap; absent when the launcher does not own the process
    pub child: Option<Child>,
}

/// Starts and stops gateway processes
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, env: &ResolvedEnv) -> Result<LaunchedProcess, StartupError>;

    /// Stop a process, gracefully first. `child` is reaped when given.
    async fn terminate(&self, pid: u32, child: Option<&mut Child>, grace: Duration);

    /// Whether the pid still refers to a live process
    fn is_alive(&self, pid: u32) -> bool;
}

/// Process manager spawning real OS processes
pub struct ProcessManager {
    config: SpawnConfig,
}

impl ProcessManager {
    /// Create a new process manager
    pub fn new(config: SpawnConfig) -> Self {
        Self { config }
    }

    /// Find the gateway executable
    fn find_executable(&self) -> Result<PathBuf, StartupError> {
        which::which(&self.config.command).map_err(|e| StartupError::Launch {
            command: self.config.command.clone(),
            reason: format!("executable not found: {}", e),
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.config.command.as_str())
            .chain(self.config.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Check if a process is running
    pub fn is_running(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
}

#[async_trait]
impl Launcher for ProcessManager {
    async fn launch(&self, env: &ResolvedEnv) -> Result<LaunchedProcess, StartupError> {
        let executable = self.find_executable()?;

        debug!(
            "Spawning gateway {:?} with variables {:?}",
            executable,
            env.keys().collect::<Vec<_>>()
        );

        let mut command = Command::new(&executable);
        command.args(&self.config.args);

        if let Some(work_dir) = &self.config.work_dir {
            command.current_dir(work_dir);
        }

        command.env_clear();
        for name in &self.config.inherit_env {
            if let Some(value) = std::env::var_os(name) {
                command.env(name, value);
            }
        }

        command
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = command.spawn().map_err(|e| StartupError::Launch {
            command: self.config.command.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| StartupError::Launch {
            command: self.config.command.clone(),
            reason: "process exited before a PID was observed".to_string(),
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, pid, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, pid, "stderr"));
        }

        info!("Gateway process spawned with PID {}", pid);

        Ok(LaunchedProcess {
            pid,
            command_line: self.command_line(),
            child: Some(child),
        })
    }

    async fn terminate(&self, pid: u32, child: Option<&mut Child>, grace: Duration) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let target = Pid::from_raw(pid as i32);

        debug!("Sending SIGTERM to PID {}", pid);
        if let Err(e) = kill(target, Signal::SIGTERM) {
            debug!("SIGTERM to PID {} failed: {}", pid, e);
            return;
        }

        match child {
            Some(child) => match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!("PID {} exited with status: {}", pid, status),
                Ok(Err(e)) => warn!("Error waiting for PID {}: {}", pid, e),
                Err(_) => {
                    warn!("PID {} still alive after {:?}, sending SIGKILL", pid, grace);
                    if let Err(e) = child.kill().await {
                        warn!("SIGKILL to PID {} failed: {}", pid, e);
                    }
                }
            },
            None => {
                let deadline = tokio::time::Instant::now() + grace;
                while tokio::time::Instant::now() < deadline {
                    if !Self::is_running(pid) {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }

                if Self::is_running(pid) {
                    warn!("PID {} still alive after {:?}, sending SIGKILL", pid, grace);
                    if let Err(e) = kill(target, Signal::SIGKILL) {
                        warn!("SIGKILL to PID {} failed: {}", pid, e);
                    }
                }
            }
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        Self::is_running(pid)
    }
}

async fn pump_lines<R: AsyncRead + Unpin>(stream: R, pid: u32, stream_name: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                info!(target: "gateway_process", pid, stream = stream_name, "{}", line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading {} of PID {}: {}", stream_name, pid, e);
                break;
            }
        }
    }
}
