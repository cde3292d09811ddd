// packages/supervisor/src/runtime/sandbox.rs
//! Sandbox activation and teardown
//!
//! Activation:
//! 1. Resolve the gateway environment
//! 2. Mount object storage (fatal on failure) and restore state if needed
//! 3. Ensure exactly one Ready gateway
//! 4. Start the periodic sync loop (and the optional watchdog)
//!
//! Teardown cancels background work, stops the gateway when configured and
//! runs one final sync. A failed final sync is logged, never propagated.

use crate::env::{resolve, RawConfig, ResolvedEnv};
use crate::runtime::handle::ProcessHandle;
use crate::runtime::process_finder::{ProcessFinder, ProcessTable, SysinfoProcessTable};
use crate::runtime::process_manager::{Launcher, ProcessManager, SpawnConfig};
use crate::runtime::readiness::{probe_from_config, LivenessProbe, ReadinessWaiter};
use crate::runtime::supervisor::ProcessSupervisor;
use crate::storage::mount::{Mounter, S3fsMounter, StorageBinding, StorageMount};
use crate::storage::sync::{StorageSync, SyncConfig, SyncReport};
use crate::utils::config::SupervisorConfig;
use crate::utils::errors::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound for background tasks to wind down at teardown
const BACKGROUND_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators a sandbox is assembled from
pub struct SandboxParts {
    pub process_table: Arc<dyn ProcessTable>,
    pub launcher: Arc<dyn Launcher>,
    pub probe: Arc<dyn LivenessProbe>,
    pub mounter: Arc<dyn Mounter>,
}

impl SandboxParts {
    /// Production collaborators for the given configuration
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            process_table: Arc::new(SysinfoProcessTable::new()),
            launcher: Arc::new(ProcessManager::new(SpawnConfig {
                command: config.gateway.command.clone(),
                args: config.gateway.args.clone(),
                work_dir: config.gateway.work_dir.clone(),
                inherit_env: config.gateway.inherit_env.clone(),
            })),
            probe: probe_from_config(&config.readiness),
            mounter: Arc::new(S3fsMounter::new(config.storage.mount_program.clone())),
        }
    }
}

/// Result of the final sync at teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalSync {
    /// No storage binding for this sandbox
    NotConfigured,
    Synced(SyncReport),
    /// State written since the last successful sync may be lost
    Failed(String),
}

/// What teardown did
#[derive(Debug, Clone)]
pub struct TeardownReport {
    pub final_sync: FinalSync,
    pub gateway_stopped: bool,
}

/// One activated sandbox
pub struct Sandbox {
    config: SupervisorConfig,
    env: ResolvedEnv,
    supervisor: Arc<ProcessSupervisor>,
    sync: Option<Arc<StorageSync>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl Sandbox {
    /// Activate with production collaborators
    pub async fn activate(config: SupervisorConfig, raw: &RawConfig) -> Result<Self> {
        let parts = SandboxParts::from_config(&config);
        Self::activate_with(config, raw, parts).await
    }

    /// Activate with explicit collaborators
    pub async fn activate_with(config: SupervisorConfig, raw: &RawConfig, parts: SandboxParts) -> Result<Self> {
        let env = resolve(raw);
        info!(
            "Resolved {} gateway variables: {:?}",
            env.len(),
            env.keys().collect::<Vec<_>>()
        );

        let sync = match StorageBinding::from_credentials(&raw.storage, &config.storage) {
            Some(binding) => {
                StorageMount::new(Arc::clone(&parts.mounter)).mount(&binding).await?;

                let sync = StorageSync::new(
                    binding,
                    Arc::clone(&parts.mounter),
                    SyncConfig {
                        local_dir: config.storage.state_dir.clone(),
                        sentinel_file: config.storage.sentinel_file.clone(),
                        exclude: config.storage.exclude.clone(),
                    },
                )?;

                if config.storage.restore_on_activate {
                    if let Err(e) = sync.restore().await {
                        warn!("State restore failed, starting with local state: {}", e);
                    }
                }

                Some(Arc::new(sync))
            }
            None => {
                warn!("Object storage not configured, gateway state will not be persisted");
                None
            }
        };

        let cancel = CancellationToken::new();
        let finder = ProcessFinder::new(
            parts.process_table,
            config.gateway.match_markers.clone(),
            config.gateway.exclude_markers.clone(),
        );
        let supervisor = Arc::new(ProcessSupervisor::new(
            finder,
            parts.launcher,
            parts.probe,
            ReadinessWaiter::from_config(&config.readiness),
            config.gateway.stop_grace(),
            cancel.child_token(),
        ));

        let sandbox = Self {
            config,
            env,
            supervisor,
            sync,
            cancel,
            tasks: Mutex::new(vec![]),
            shutdown_timeout: BACKGROUND_SHUTDOWN_TIMEOUT,
        };

        let handle = sandbox.ensure_gateway().await?;
        info!("Sandbox activated, gateway PID {} ready", handle.pid);

        sandbox.start_background().await;
        Ok(sandbox)
    }

    /// Find-or-create the gateway; safe to call on every request
    pub async fn ensure_gateway(&self) -> Result<ProcessHandle> {
        Ok(self.supervisor.ensure_gateway(&self.env).await?)
    }

    pub fn env(&self) -> &ResolvedEnv {
        &self.env
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn storage_sync(&self) -> Option<&Arc<StorageSync>> {
        self.sync.as_ref()
    }

    /// Cancelled when teardown starts
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn start_background(&self) {
        let mut tasks = self.tasks.lock().await;

        if let Some(sync) = &self.sync {
            let interval = self.config.storage.sync_interval();
            info!("Starting periodic storage sync every {:?}", interval);
            tasks.push(Arc::clone(sync).spawn_periodic(
                interval,
                self.supervisor.subscribe(),
                self.cancel.child_token(),
            ));
        }

        if let Some(interval) = self.config.gateway.watchdog_interval() {
            info!("Starting gateway watchdog every {:?}", interval);
            let supervisor = Arc::clone(&self.supervisor);
            let env = self.env.clone();
            let cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = supervisor.ensure_gateway(&env).await {
                                error!("Watchdog could not ensure gateway: {}", e);
                            }
                        }
                    }
                }
                debug!("Gateway watchdog stopped");
            }));
        }
    }

    /// Stop background work, optionally the gateway, and run the final sync
    pub async fn teardown(self) -> TeardownReport {
        info!("Tearing down sandbox");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for mut task in tasks {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Background task ended abnormally: {}", e),
                Err(_) => {
                    warn!("Background task did not stop within {:?}, aborting", self.shutdown_timeout);
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        let gateway_stopped = if self.config.gateway.stop_on_teardown {
            self.supervisor.stop().await;
            true
        } else {
            false
        };

        let final_sync = match &self.sync {
            Some(sync) => match sync.sync_and_record().await {
                Ok(report) => FinalSync::Synced(report),
                Err(e) => FinalSync::Failed(e.to_string()),
            },
            None => FinalSync::NotConfigured,
        };

        info!("Sandbox teardown complete: {:?}", final_sync);
        TeardownReport {
            final_sync,
            gateway_stopped,
        }
    }
}
