// packages/supervisor/src/storage/sync.rs
//! Mirroring of the gateway state directory into the mounted bucket
//!
//! - **sync**: local → bucket, local state wins (stale remote files removed)
//! - **restore**: bucket → local before launch, nothing removed
//! - **periodic loop**: syncs on an interval while the gateway is Ready
//!
//! Re-syncing unchanged state copies nothing. Failures are logged and counted
//! but never abort the caller's lifecycle. Mirror passes never overlap: the
//! pass lock is held by the blocking copy itself, so it outlives an aborted
//! caller.

use crate::runtime::handle::Liveness;
use crate::storage::mount::{Mounter, StorageBinding};
use crate::utils::errors::SyncError;
use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Marker written at the mount root after every successful sync
pub const LAST_SYNC_MARKER: &str = ".last-sync";

/// Outcome of one mirror pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub files_copied: u64,
    pub files_unchanged: u64,
    pub files_deleted: u64,
    pub bytes_copied: u64,
    pub completed_at: DateTime<Utc>,
}

/// Sync settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Gateway state directory
    pub local_dir: PathBuf,

    /// File that proves the local state was initialized
    pub sentinel_file: String,

    /// Glob patterns never mirrored
    pub exclude: Vec<String>,
}

/// Pushes local state to the bound bucket
pub struct StorageSync {
    binding: StorageBinding,
    mounter: Arc<dyn Mounter>,
    local_dir: PathBuf,
    sentinel_file: String,
    exclude: Arc<Vec<Pattern>>,
    in_flight: Arc<Mutex<()>>,
}

impl StorageSync {
    pub fn new(binding: StorageBinding, mounter: Arc<dyn Mounter>, config: SyncConfig) -> Result<Self, SyncError> {
        let exclude = config
            .exclude
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| SyncError::Pattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            binding,
            mounter,
            local_dir: config.local_dir,
            sentinel_file: config.sentinel_file,
            exclude: Arc::new(exclude),
            in_flight: Arc::new(Mutex::new(())),
        })
    }

    pub fn binding(&self) -> &StorageBinding {
        &self.binding
    }

    fn marker_path(&self) -> PathBuf {
        self.binding.mount_path.join(LAST_SYNC_MARKER)
    }

    async fn ensure_mounted(&self) -> Result<(), SyncError> {
        match self.mounter.is_mounted(&self.binding.mount_path).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(SyncError::NotMounted(self.binding.mount_path.clone())),
            Err(e) => {
                warn!("Could not check mount state: {}", e);
                Err(SyncError::NotMounted(self.binding.mount_path.clone()))
            }
        }
    }

    /// Copy local changes to the bucket
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let pass = Arc::clone(&self.in_flight).lock_owned().await;
        self.ensure_mounted().await?;

        let sentinel = self.local_dir.join(&self.sentinel_file);
        if !tokio::fs::try_exists(&sentinel).await.unwrap_or(false) {
            return Err(SyncError::MissingSentinel(sentinel));
        }

        let source = self.local_dir.clone();
        let target = self.binding.remote_dir();
        let exclude = Arc::clone(&self.exclude);
        let marker = self.marker_path();

        tokio::task::spawn_blocking(move || -> Result<SyncReport, SyncError> {
            let _pass = pass;
            let report = mirror(&source, &target, &exclude, true)?;
            let body = serde_json::to_vec_pretty(&report).map_err(|e| SyncError::Task(e.to_string()))?;
            fs::write(&marker, body).map_err(|e| SyncError::io(&marker, e))?;
            Ok(report)
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
    }

    /// Sync, logging and counting the outcome
    pub async fn sync_and_record(&self) -> Result<SyncReport, SyncError> {
        let result = self.sync().await;
        match &result {
            Ok(report) => {
                info!(
                    copied = report.files_copied,
                    deleted = report.files_deleted,
                    unchanged = report.files_unchanged,
                    bytes = report.bytes_copied,
                    "Storage sync succeeded"
                );
                metrics::counter!("storage_sync_total", "outcome" => "success").increment(1);
            }
            Err(e) => {
                error!(error = %e, "Storage sync FAILED, unsynced state may be lost");
                metrics::counter!("storage_sync_total", "outcome" => "failure").increment(1);
            }
        }
        result
    }

    /// Report of the last successful sync, if the marker is readable
    pub async fn last_sync(&self) -> Option<SyncReport> {
        let body = tokio::fs::read(self.marker_path()).await.ok()?;
        serde_json::from_slice(&body).ok()
    }

    /// Copy the bucket state into an uninitialized local directory.
    /// Returns `None` when there is nothing to restore.
    pub async fn restore(&self) -> Result<Option<SyncReport>, SyncError> {
        let pass = Arc::clone(&self.in_flight).lock_owned().await;
        self.ensure_mounted().await?;

        let local_sentinel = self.local_dir.join(&self.sentinel_file);
        if tokio::fs::try_exists(&local_sentinel).await.unwrap_or(false) {
            debug!("Local state present at {:?}, skipping restore", self.local_dir);
            return Ok(None);
        }

        let source = self.binding.remote_dir();
        if !tokio::fs::try_exists(source.join(&self.sentinel_file)).await.unwrap_or(false) {
            debug!("No backup found at {:?}", source);
            return Ok(None);
        }

        let target = self.local_dir.clone();
        let exclude = Arc::clone(&self.exclude);
        let report = tokio::task::spawn_blocking(move || {
            let _pass = pass;
            mirror(&source, &target, &exclude, false)
        })
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;

        info!("Restored {} files from {:?}", report.files_copied, self.binding.remote_dir());
        Ok(Some(report))
    }

    /// Sync on `interval` while the gateway is Ready, until cancelled
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        liveness: watch::Receiver<Liveness>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Periodic sync stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if *liveness.borrow() != Liveness::Ready {
                            debug!("Gateway not ready, skipping periodic sync");
                            continue;
                        }
                        // Outcome already logged and counted
                        let _ = self.sync_and_record().await;
                    }
                }
            }
        })
    }
}

fn is_excluded(rel: &Path, exclude: &[Pattern]) -> bool {
    let name = rel.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    exclude
        .iter()
        .any(|pattern| pattern.matches(&name) || pattern.matches_path(rel))
}

fn same_content(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) if ma.is_file() && mb.is_file() && ma.len() == mb.len() => {
            matches!((fs::read(a), fs::read(b)), (Ok(da), Ok(db)) if da == db)
        }
        _ => false,
    }
}

/// Mirror `source` into `target`. With `delete`, target files absent from
/// source are removed; excluded paths are neither copied nor removed.
fn mirror(source: &Path, target: &Path, exclude: &[Pattern], delete: bool) -> Result<SyncReport, SyncError> {
    fs::create_dir_all(target).map_err(|e| SyncError::io(target, e))?;

    let mut report = SyncReport {
        files_copied: 0,
        files_unchanged: 0,
        files_deleted: 0,
        bytes_copied: 0,
        completed_at: Utc::now(),
    };
    let mut seen: HashSet<PathBuf> = HashSet::new();

    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(source)
                .map(|rel| !is_excluded(rel, exclude))
                .unwrap_or(false)
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
            SyncError::io(path, e.into())
        })?;
        let rel = match entry.path().strip_prefix(source) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        let destination = target.join(&rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination).map_err(|e| SyncError::io(&destination, e))?;
        } else if entry.file_type().is_file() {
            if same_content(entry.path(), &destination) {
                report.files_unchanged += 1;
            } else {
                let bytes = fs::copy(entry.path(), &destination).map_err(|e| SyncError::io(&destination, e))?;
                report.files_copied += 1;
                report.bytes_copied += bytes;
            }
        } else {
            debug!("Skipping non-regular file {:?}", entry.path());
            continue;
        }
        seen.insert(rel);
    }

    if delete {
        let stale: Vec<(PathBuf, bool)> = WalkDir::new(target)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let rel = entry.path().strip_prefix(target).ok()?.to_path_buf();
                let keep = seen.contains(&rel) || rel.ancestors().any(|a| is_excluded(a, exclude) && a != Path::new(""));
                (!keep).then(|| (entry.path().to_path_buf(), entry.file_type().is_dir()))
            })
            .collect();

        for (path, is_dir) in stale {
            if is_dir {
                let empty = fs::read_dir(&path).map(|mut d| d.next().is_none()).unwrap_or(false);
                if empty {
                    fs::remove_dir(&path).map_err(|e| SyncError::io(&path, e))?;
                }
            } else {
                fs::remove_file(&path).map_err(|e| SyncError::io(&path, e))?;
                report.files_deleted += 1;
            }
        }
    }

    report.completed_at = Utc::now();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mount::tests::{binding, FakeMounter};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        local: PathBuf,
        mounter: Arc<FakeMounter>,
        sync: Arc<StorageSync>,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let local = root.path().join("state");
        let mount = root.path().join("mnt");
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&mount).unwrap();

        let mounter = Arc::new(FakeMounter::mounted());
        let sync = StorageSync::new(
            binding(&mount),
            mounter.clone(),
            SyncConfig {
                local_dir: local.clone(),
                sentinel_file: "openclaw.json".to_string(),
                exclude: vec!["*.lock".into(), "*.log".into(), "*.tmp".into()],
            },
        )
        .unwrap();

        Fixture {
            _root: root,
            local,
            mounter,
            sync: Arc::new(sync),
        }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_sync_copies_and_excludes() {
        let fx = fixture();
        write(&fx.local.join("openclaw.json"), "{}");
        write(&fx.local.join("agents/main/session.jsonl"), "hello");
        write(&fx.local.join("gateway.lock"), "1");
        write(&fx.local.join("logs/run.log"), "noise");

        let report = fx.sync.sync().await.unwrap();
        assert_eq!(report.files_copied, 2);

        let remote = fx.sync.binding().remote_dir();
        assert_eq!(fs::read_to_string(remote.join("agents/main/session.jsonl")).unwrap(), "hello");
        assert!(!remote.join("gateway.lock").exists());
        assert!(!remote.join("logs/run.log").exists());
    }

    #[tokio::test]
    async fn test_resync_unchanged_is_noop() {
        let fx = fixture();
        write(&fx.local.join("openclaw.json"), "{}");
        write(&fx.local.join("a.txt"), "a");

        fx.sync.sync().await.unwrap();
        let again = fx.sync.sync().await.unwrap();
        assert_eq!(again.files_copied, 0);
        assert_eq!(again.files_deleted, 0);
        assert_eq!(again.files_unchanged, 2);
    }

    #[tokio::test]
    async fn test_local_state_wins() {
        let fx = fixture();
        write(&fx.local.join("openclaw.json"), "{\"v\":2}");
        let remote = fx.sync.binding().remote_dir();
        write(&remote.join("openclaw.json"), "{\"v\":1}");
        write(&remote.join("old/removed.txt"), "gone");
        write(&remote.join("keep.lock"), "excluded");

        let report = fx.sync.sync().await.unwrap();
        assert_eq!(report.files_deleted, 1);
        assert_eq!(fs::read_to_string(remote.join("openclaw.json")).unwrap(), "{\"v\":2}");
        assert!(!remote.join("old").exists());
        assert!(remote.join("keep.lock").exists());
    }

    #[tokio::test]
    async fn test_refuses_without_sentinel() {
        let fx = fixture();
        write(&fx.local.join("a.txt"), "a");
        let remote = fx.sync.binding().remote_dir();
        write(&remote.join("openclaw.json"), "backup");

        let err = fx.sync.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::MissingSentinel(_)));
        assert!(remote.join("openclaw.json").exists());
    }

    #[tokio::test]
    async fn test_not_mounted() {
        let fx = fixture();
        write(&fx.local.join("openclaw.json"), "{}");
        fx.mounter.mounted.store(false, Ordering::SeqCst);

        let err = fx.sync.sync_and_record().await.unwrap_err();
        assert!(matches!(err, SyncError::NotMounted(_)));
    }

    #[tokio::test]
    async fn test_last_sync_marker() {
        let fx = fixture();
        assert!(fx.sync.last_sync().await.is_none());

        write(&fx.local.join("openclaw.json"), "{}");
        let report = fx.sync.sync().await.unwrap();
        assert_eq!(fx.sync.last_sync().await, Some(report));
    }

    #[tokio::test]
    async fn test_sync_waits_for_pass_in_flight() {
        let fx = fixture();
        write(&fx.local.join("openclaw.json"), "{}");

        let pass = Arc::clone(&fx.sync.in_flight).lock_owned().await;
        let sync = Arc::clone(&fx.sync);
        let mut waiting = tokio::spawn(async move { sync.sync().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tokio::time::timeout(Duration::from_millis(10), &mut waiting).await.is_err());
        assert!(fx.sync.last_sync().await.is_none());

        drop(pass);
        let report = waiting.await.unwrap().unwrap();
        assert_eq!(report.files_copied, 1);
    }

    #[tokio::test]
    async fn test_restore_into_empty_local() {
        let fx = fixture();
        let remote = fx.sync.binding().remote_dir();
        write(&remote.join("openclaw.json"), "{\"restored\":true}");
        write(&remote.join("skills/a.md"), "skill");

        let report = fx.sync.restore().await.unwrap().unwrap();
        assert_eq!(report.files_copied, 2);
        assert_eq!(fs::read_to_string(fx.local.join("skills/a.md")).unwrap(), "skill");

        // Local state now initialized; a second restore is skipped
        assert!(fx.sync.restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_without_backup() {
        let fx = fixture();
        assert!(fx.sync.restore().await.unwrap().is_none());
    }

    #[test]
    fn test_invalid_pattern() {
        let root = tempfile::tempdir().unwrap();
        let result = StorageSync::new(
            binding(root.path()),
            Arc::new(FakeMounter::mounted()),
            SyncConfig {
                local_dir: root.path().to_path_buf(),
                sentinel_file: "openclaw.json".to_string(),
                exclude: vec!["[".into()],
            },
        );
        assert!(matches!(result, Err(SyncError::Pattern { .. })));
    }

    #[tokio::test]
    async fn test_periodic_sync_waits_for_ready() {
        let fx = fixture();
        write(&fx.local.join("openclaw.json"), "{}");
        let (tx, rx) = watch::channel(Liveness::Starting);
        let cancel = CancellationToken::new();

        let task = Arc::clone(&fx.sync).spawn_periodic(Duration::from_millis(20), rx, cancel.clone());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(fx.sync.last_sync().await.is_none());

        tx.send_replace(Liveness::Ready);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fx.sync.last_sync().await.is_some());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
