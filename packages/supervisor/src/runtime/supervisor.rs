// packages/supervisor/src/runtime/supervisor.rs
//! Single-instance gateway supervision (find-or-create)
//!
//! ```text
//! ensure_gateway
//!   └─ lock ─ find ─┬─ found, probe positive ──────────────► Ready
//!                   ├─ found, probe negative ─ wait ───────► Ready | Failed
//!                   └─ not found ─ launch ─ wait / exit ───► Ready | Failed
//! ```
//!
//! The state lock is held across find, launch and wait, so concurrent callers
//! in one sandbox can never both observe "not found" and both launch. A tracked
//! process that is still alive is kept even when the process table misses it.

use crate::env::ResolvedEnv;
use crate::runtime::handle::{Liveness, Origin, ProcessHandle};
use crate::runtime::process_finder::ProcessFinder;
use crate::runtime::process_manager::Launcher;
use crate::runtime::readiness::{LivenessProbe, ReadinessWaiter, WaitOutcome};
use crate::utils::errors::StartupError;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The process currently owned by the supervisor
struct Supervised {
    handle: ProcessHandle,
    child: Option<Child>,
}

impl Supervised {
    /// True when we own the child and it has already exited
    fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => false,
        }
    }
}

/// Guarantees at most one active gateway per sandbox
pub struct ProcessSupervisor {
    finder: ProcessFinder,
    launcher: Arc<dyn Launcher>,
    probe: Arc<dyn LivenessProbe>,
    waiter: ReadinessWaiter,
    stop_grace: Duration,
    cancel: CancellationToken,
    state: Mutex<Option<Supervised>>,
    liveness: watch::Sender<Liveness>,
}

impl ProcessSupervisor {
    pub fn new(
        finder: ProcessFinder,
        launcher: Arc<dyn Launcher>,
        probe: Arc<dyn LivenessProbe>,
        waiter: ReadinessWaiter,
        stop_grace: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (liveness, _) = watch::channel(Liveness::Unknown);
        Self {
            finder,
            launcher,
            probe,
            waiter,
            stop_grace,
            cancel,
            state: Mutex::new(None),
            liveness,
        }
    }

    /// Liveness of the supervised process
    pub fn liveness(&self) -> Liveness {
        *self.liveness.borrow()
    }

    /// Observe liveness transitions
    pub fn subscribe(&self) -> watch::Receiver<Liveness> {
        self.liveness.subscribe()
    }

    /// Handle of the supervised process, if any
    pub async fn current(&self) -> Option<ProcessHandle> {
        self.state.lock().await.as_ref().map(|s| s.handle.clone())
    }

    /// Return a Ready gateway, adopting or launching one as needed
    pub async fn ensure_gateway(&self, env: &ResolvedEnv) -> Result<ProcessHandle, StartupError> {
        let mut state = self.state.lock().await;

        if let Some(supervised) = state.as_mut() {
            if supervised.has_exited() {
                warn!("Gateway PID {} has exited", supervised.handle.pid);
                *state = None;
                self.publish(Liveness::Dead);
            }
        }

        let found = match self.finder.find() {
            Some(found) => Some(found),
            None => match state.as_ref() {
                Some(tracked) if self.tracked_alive(tracked) => {
                    warn!(
                        "Gateway PID {} missing from process table but still alive, keeping it",
                        tracked.handle.pid
                    );
                    Some(tracked.handle.clone())
                }
                _ => None,
            },
        };

        match found {
            Some(found) => {
                let tracked = state.take().filter(|s| s.handle.same_process(&found));
                let mut supervised = match tracked {
                    Some(tracked) if tracked.handle.liveness == Liveness::Ready => {
                        debug!("Gateway PID {} already ready", tracked.handle.pid);
                        let handle = tracked.handle.clone();
                        *state = Some(tracked);
                        return Ok(handle);
                    }
                    Some(tracked) => tracked,
                    None => {
                        info!("Found existing gateway process PID {}", found.pid);
                        Supervised {
                            handle: found,
                            child: None,
                        }
                    }
                };

                if self.probe.is_live().await {
                    supervised.handle.liveness = Liveness::Ready;
                    self.publish(Liveness::Ready);
                    let handle = supervised.handle.clone();
                    *state = Some(supervised);
                    return Ok(handle);
                }

                info!("Gateway PID {} not ready yet, waiting", supervised.handle.pid);
                supervised.handle.liveness = Liveness::Starting;
                self.publish(Liveness::Starting);
                let result = self.await_ready(&mut supervised).await;
                Self::settle(&mut state, supervised, result)
            }
            None => {
                if let Some(stale) = state.take() {
                    warn!("Gateway PID {} no longer in process table", stale.handle.pid);
                    self.publish(Liveness::Dead);
                }

                let launched = self.launcher.launch(env).await.map_err(|e| {
                    metrics::counter!("gateway_startup_failures_total", "reason" => "launch").increment(1);
                    e
                })?;
                metrics::counter!("gateway_launches_total").increment(1);

                let mut supervised = Supervised {
                    handle: ProcessHandle::new(launched.pid, launched.command_line, Origin::Launched)
                        .with_liveness(Liveness::Starting),
                    child: launched.child,
                };
                self.publish(Liveness::Starting);

                let result = self.await_ready(&mut supervised).await;
                Self::settle(&mut state, supervised, result)
            }
        }
    }

    /// Stop the supervised process, if any
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut supervised) = state.take() {
            info!("Stopping gateway PID {}", supervised.handle.pid);
            self.launcher
                .terminate(supervised.handle.pid, supervised.child.as_mut(), self.stop_grace)
                .await;
            self.publish(Liveness::Dead);
        }
    }

    /// A tracked process outlives a table miss while its child has not been
    /// reaped, or while the pid still answers signals
    fn tracked_alive(&self, tracked: &Supervised) -> bool {
        match tracked.child {
            Some(_) => true,
            None => self.launcher.is_alive(tracked.handle.pid),
        }
    }

    /// Wait for readiness; on failure the process is stopped and marked Dead
    async fn await_ready(&self, supervised: &mut Supervised) -> Result<(), StartupError> {
        let pid = supervised.handle.pid;

        let outcome = match supervised.child.as_mut() {
            Some(child) => tokio::select! {
                outcome = self.waiter.wait(self.probe.as_ref(), &self.cancel) => outcome,
                status = child.wait() => {
                    let status = match status {
                        Ok(status) => status.to_string(),
                        Err(e) => e.to_string(),
                    };
                    error!("Gateway PID {} exited during startup: {}", pid, status);
                    supervised.handle.liveness = Liveness::Dead;
                    self.publish(Liveness::Dead);
                    metrics::counter!("gateway_startup_failures_total", "reason" => "exited").increment(1);
                    return Err(StartupError::Exited { pid, status });
                }
            },
            None => self.waiter.wait(self.probe.as_ref(), &self.cancel).await,
        };

        match outcome {
            WaitOutcome::Ready(waited) => {
                info!("Gateway PID {} ready after {:?}", pid, waited);
                metrics::histogram!("gateway_readiness_wait_seconds").record(waited.as_secs_f64());
                supervised.handle.liveness = Liveness::Ready;
                self.publish(Liveness::Ready);
                Ok(())
            }
            WaitOutcome::TimedOut(waited) => {
                error!(
                    "Gateway PID {} not ready after {:?} ({}), stopping it",
                    pid,
                    waited,
                    self.probe.describe()
                );
                self.launcher
                    .terminate(pid, supervised.child.as_mut(), self.stop_grace)
                    .await;
                supervised.handle.liveness = Liveness::Dead;
                self.publish(Liveness::Dead);
                metrics::counter!("gateway_startup_failures_total", "reason" => "timeout").increment(1);
                Err(StartupError::Timeout {
                    pid,
                    waited,
                    probe: self.probe.describe(),
                })
            }
            WaitOutcome::Cancelled => {
                warn!("Readiness wait for PID {} cancelled", pid);
                Err(StartupError::Cancelled { pid })
            }
        }
    }

    /// Store the process unless it died, and convert to the caller's result
    fn settle(
        state: &mut Option<Supervised>,
        supervised: Supervised,
        result: Result<(), StartupError>,
    ) -> Result<ProcessHandle, StartupError> {
        let handle = supervised.handle.clone();
        if handle.liveness != Liveness::Dead {
            *state = Some(supervised);
        }
        result.map(|_| handle)
    }

    fn publish(&self, liveness: Liveness) {
        self.liveness.send_replace(liveness);
        metrics::gauge!("gateway_ready").set(if liveness == Liveness::Ready { 1.0 } else { 0.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{resolve, RawConfig};
    use crate::runtime::process_finder::tests::FakeProcessTable;
    use crate::runtime::process_finder::{EntryState, ProcessEntry, SysinfoProcessTable};
    use crate::runtime::process_manager::tests::{FakeLauncher, GATEWAY_CMD};
    use crate::runtime::process_manager::{ProcessManager, SpawnConfig};
    use crate::runtime::readiness::tests::FakeProbe;
    use std::sync::atomic::Ordering;

    struct Fixture {
        table: FakeProcessTable,
        launcher: Arc<FakeLauncher>,
        probe: Arc<FakeProbe>,
        supervisor: Arc<ProcessSupervisor>,
    }

    fn fixture(probe: FakeProbe) -> Fixture {
        let table = FakeProcessTable::default();
        let launcher = Arc::new(FakeLauncher::new(table.clone()));
        let probe = Arc::new(probe);
        let finder = ProcessFinder::new(
            Arc::new(table.clone()),
            vec!["start-openclaw.sh".into()],
            vec!["openclaw devices".into()],
        );
        let supervisor = Arc::new(ProcessSupervisor::new(
            finder,
            launcher.clone(),
            probe.clone(),
            ReadinessWaiter::new(Duration::from_millis(5), Duration::from_millis(150)),
            Duration::from_millis(10),
            CancellationToken::new(),
        ));
        Fixture {
            table,
            launcher,
            probe,
            supervisor,
        }
    }

    fn env() -> ResolvedEnv {
        resolve(&RawConfig::from_vars([("OPENROUTER_API_KEY", "d1")]))
    }

    #[tokio::test]
    async fn test_launches_when_not_found() {
        let fx = fixture(FakeProbe::ready_after(2));

        let handle = fx.supervisor.ensure_gateway(&env()).await.unwrap();
        assert_eq!(handle.liveness, Liveness::Ready);
        assert_eq!(handle.origin, Origin::Launched);
        assert_eq!(fx.launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(fx.supervisor.liveness(), Liveness::Ready);
    }

    #[tokio::test]
    async fn test_second_ensure_returns_same_process() {
        let fx = fixture(FakeProbe::ready_after(1));

        let first = fx.supervisor.ensure_gateway(&env()).await.unwrap();
        let second = fx.supervisor.ensure_gateway(&env()).await.unwrap();

        assert!(first.same_process(&second));
        assert_eq!(fx.launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_launches_once() {
        let fx = fixture(FakeProbe::ready_after(3));

        let mut tasks = vec![];
        for _ in 0..8 {
            let supervisor = Arc::clone(&fx.supervisor);
            tasks.push(tokio::spawn(async move { supervisor.ensure_gateway(&env()).await }));
        }

        let mut pids = vec![];
        for task in tasks {
            pids.push(task.await.unwrap().unwrap().pid);
        }

        pids.dedup();
        assert_eq!(pids.len(), 1);
        assert_eq!(fx.launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_adopts_ready_process() {
        let fx = fixture(FakeProbe::ready_after(1));
        fx.table.push(ProcessEntry::running(77, GATEWAY_CMD));

        let handle = fx.supervisor.ensure_gateway(&env()).await.unwrap();
        assert_eq!(handle.pid, 77);
        assert_eq!(handle.origin, Origin::Adopted);
        assert_eq!(handle.liveness, Liveness::Ready);
        assert_eq!(fx.launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejoins_wait_for_starting_process() {
        let fx = fixture(FakeProbe::ready_after(4));
        fx.table.push(ProcessEntry::running(78, GATEWAY_CMD));

        let handle = fx.supervisor.ensure_gateway(&env()).await.unwrap();
        assert_eq!(handle.pid, 78);
        assert_eq!(handle.liveness, Liveness::Ready);
        assert!(fx.probe.polls.load(Ordering::SeqCst) >= 4);
        assert_eq!(fx.launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zombie_is_replaced() {
        let fx = fixture(FakeProbe::ready_after(1));
        fx.table.push(ProcessEntry {
            pid: 79,
            command_line: GATEWAY_CMD.into(),
            state: EntryState::Zombie,
        });

        let handle = fx.supervisor.ensure_gateway(&env()).await.unwrap();
        assert_ne!(handle.pid, 79);
        assert_eq!(fx.launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_readiness_timeout_fails_with_startup_error() {
        let fx = fixture(FakeProbe::never());
        let mut liveness = fx.supervisor.subscribe();

        let err = fx.supervisor.ensure_gateway(&env()).await.unwrap_err();
        assert!(matches!(err, StartupError::Timeout { .. }));
        assert_ne!(*liveness.borrow_and_update(), Liveness::Ready);
        assert_eq!(fx.supervisor.liveness(), Liveness::Dead);
        assert!(fx.supervisor.current().await.is_none());
        assert_eq!(fx.launcher.terminated.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_timeout_relaunches() {
        let fx = fixture(FakeProbe::never());
        assert!(fx.supervisor.ensure_gateway(&env()).await.is_err());

        fx.probe.set_live(true);
        let handle = fx.supervisor.ensure_gateway(&env()).await.unwrap();
        assert_eq!(handle.liveness, Liveness::Ready);
        assert_eq!(fx.launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_relaunches_after_process_death() {
        let fx = fixture(FakeProbe::ready_after(1));
        let first = fx.supervisor.ensure_gateway(&env()).await.unwrap();

        fx.table.remove(first.pid);
        let second = fx.supervisor.ensure_gateway(&env()).await.unwrap();

        assert!(!first.same_process(&second));
        assert_eq!(fx.launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_terminates_current() {
        let fx = fixture(FakeProbe::ready_after(1));
        let handle = fx.supervisor.ensure_gateway(&env()).await.unwrap();

        fx.supervisor.stop().await;
        assert_eq!(*fx.launcher.terminated.lock(), vec![handle.pid]);
        assert_eq!(fx.supervisor.liveness(), Liveness::Dead);
    }

    #[tokio::test]
    async fn test_live_child_kept_when_table_misses_it() {
        let launcher = Arc::new(ProcessManager::new(SpawnConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 30 # start-openclaw.sh".to_string()],
            work_dir: None,
            inherit_env: vec!["PATH".to_string()],
        }));
        let finder = ProcessFinder::new(
            Arc::new(FakeProcessTable::default()),
            vec!["start-openclaw.sh".into()],
            vec![],
        );
        let supervisor = ProcessSupervisor::new(
            finder,
            launcher,
            Arc::new(FakeProbe::ready_after(1)),
            ReadinessWaiter::new(Duration::from_millis(10), Duration::from_secs(5)),
            Duration::from_secs(2),
            CancellationToken::new(),
        );

        let first = supervisor.ensure_gateway(&env()).await.unwrap();
        let second = supervisor.ensure_gateway(&env()).await.unwrap();
        assert_eq!(first.pid, second.pid);
        assert!(ProcessManager::is_running(first.pid));

        supervisor.stop().await;
        assert!(!ProcessManager::is_running(first.pid));
    }

    #[tokio::test]
    async fn test_adopted_process_kept_while_alive() {
        let fx = fixture(FakeProbe::ready_after(1));
        fx.table.push(ProcessEntry::running(81, GATEWAY_CMD));
        let first = fx.supervisor.ensure_gateway(&env()).await.unwrap();

        fx.table.hide(81);
        let second = fx.supervisor.ensure_gateway(&env()).await.unwrap();
        assert_eq!(first.pid, second.pid);
        assert_eq!(fx.launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_early_exit_is_startup_error() {
        let marker = "sandbox-supervisor-early-exit-test";
        let launcher = Arc::new(ProcessManager::new(SpawnConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), format!("exit 3 # {}", marker)],
            work_dir: None,
            inherit_env: vec![],
        }));
        let finder = ProcessFinder::new(Arc::new(SysinfoProcessTable::new()), vec![marker.into()], vec![]);
        let supervisor = ProcessSupervisor::new(
            finder,
            launcher,
            Arc::new(FakeProbe::never()),
            ReadinessWaiter::new(Duration::from_millis(10), Duration::from_secs(10)),
            Duration::from_millis(100),
            CancellationToken::new(),
        );

        let err = supervisor.ensure_gateway(&env()).await.unwrap_err();
        assert!(matches!(err, StartupError::Exited { .. }));
        assert_eq!(supervisor.liveness(), Liveness::Dead);
    }
}
