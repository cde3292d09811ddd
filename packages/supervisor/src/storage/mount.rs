// packages/supervisor/src/storage/mount.rs
//! Binding of a local directory to the object storage bucket
//!
//! The bucket is mounted through a FUSE helper (s3fs), so the gateway's state
//! directory can be mirrored into it with plain file operations. Mounting is
//! idempotent: an existing FUSE mount at the path is reused.

use crate::env::StorageCredentials;
use crate::utils::config::StorageConfig;
use crate::utils::errors::MountError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Kernel mount table
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Access key pair handed to the mount helper
#[derive(Clone, PartialEq, Eq)]
pub struct MountCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for MountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountCredentials")
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Association between a local path and a bucket/prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageBinding {
    /// Bucket name
    pub bucket: String,

    /// S3-compatible endpoint URL
    pub endpoint: String,

    /// Local mount point
    pub mount_path: PathBuf,

    /// Directory inside the bucket holding the gateway state
    pub prefix: String,

    pub credentials: MountCredentials,
}

impl StorageBinding {
    /// Derive the binding; `None` when storage is not configured
    pub fn from_credentials(credentials: &StorageCredentials, config: &StorageConfig) -> Option<Self> {
        let (access_key_id, secret_access_key, account_id) = match (
            &credentials.access_key_id,
            &credentials.secret_access_key,
            &credentials.account_id,
        ) {
            (Some(key), Some(secret), Some(account)) => (key, secret, account),
            _ => return None,
        };

        Some(Self {
            bucket: credentials
                .bucket_name
                .clone()
                .unwrap_or_else(|| config.default_bucket.clone()),
            endpoint: config.endpoint_template.replace("{account_id}", account_id),
            mount_path: config.mount_path.clone(),
            prefix: config.prefix.clone(),
            credentials: MountCredentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
            },
        })
    }

    /// Mirror target for the local state directory
    pub fn remote_dir(&self) -> PathBuf {
        self.mount_path.join(&self.prefix)
    }
}

/// Mount backend
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Whether a bucket is mounted at the path
    async fn is_mounted(&self, path: &Path) -> Result<bool, MountError>;

    /// Mount the bucket; called only when not already mounted
    async fn mount(&self, binding: &StorageBinding) -> Result<(), MountError>;
}

/// Mounts through the s3fs FUSE helper
pub struct S3fsMounter {
    program: String,
    mount_table: PathBuf,
}

impl S3fsMounter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            mount_table: PathBuf::from(PROC_MOUNTS),
        }
    }
}

#[async_trait]
impl Mounter for S3fsMounter {
    async fn is_mounted(&self, path: &Path) -> Result<bool, MountError> {
        let table = tokio::fs::read_to_string(&self.mount_table)
            .await
            .map_err(MountError::MountTable)?;
        Ok(is_fuse_mounted(&table, path))
    }

    async fn mount(&self, binding: &StorageBinding) -> Result<(), MountError> {
        tokio::fs::create_dir_all(&binding.mount_path)
            .await
            .map_err(|source| MountError::MountPoint {
                path: binding.mount_path.clone(),
                source,
            })?;

        debug!(
            "Running {} for bucket {} at {:?}",
            self.program, binding.bucket, binding.mount_path
        );

        let output = Command::new(&self.program)
            .arg(&binding.bucket)
            .arg(&binding.mount_path)
            .arg("-o")
            .arg(format!("url={}", binding.endpoint))
            .args(["-o", "use_path_request_style"])
            .args(["-o", "nomixupload"])
            .env("AWSACCESSKEYID", &binding.credentials.access_key_id)
            .env("AWSSECRETACCESSKEY", &binding.credentials.secret_access_key)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MountError::HelperUnavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }

        Err(MountError::MountFailed {
            bucket: binding.bucket.clone(),
            path: binding.mount_path.clone(),
            detail: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}

/// Whether the mount table lists a FUSE filesystem at `path`
pub fn is_fuse_mounted(table: &str, path: &Path) -> bool {
    let wanted = path.to_string_lossy();
    let wanted = wanted.trim_end_matches('/');

    table.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let (_source, mount_point, fs_type) = match (fields.next(), fields.next(), fields.next()) {
            (Some(source), Some(mount_point), Some(fs_type)) => (source, mount_point, fs_type),
            _ => return false,
        };
        fs_type.starts_with("fuse") && unescape_mount_point(mount_point).trim_end_matches('/') == wanted
    })
}

/// /proc/mounts encodes space, tab, newline and backslash as octal escapes
fn unescape_mount_point(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Prepares the storage binding before the gateway starts
#[derive(Clone)]
pub struct StorageMount {
    mounter: Arc<dyn Mounter>,
}

impl StorageMount {
    pub fn new(mounter: Arc<dyn Mounter>) -> Self {
        Self { mounter }
    }

    /// Mount the bucket unless already mounted. Errors are fatal to activation.
    pub async fn mount(&self, binding: &StorageBinding) -> Result<(), MountError> {
        if self.mounter.is_mounted(&binding.mount_path).await? {
            info!("Bucket already mounted at {:?}", binding.mount_path);
            return Ok(());
        }

        info!(
            "Mounting bucket {} ({}) at {:?}",
            binding.bucket, binding.endpoint, binding.mount_path
        );

        match self.mounter.mount(binding).await {
            Ok(()) => {
                info!("Bucket {} mounted", binding.bucket);
                Ok(())
            }
            Err(e) => {
                // A concurrent activation may have won the race
                if self.mounter.is_mounted(&binding.mount_path).await.unwrap_or(false) {
                    warn!("Mount helper failed but {:?} is mounted: {}", binding.mount_path, e);
                    return Ok(());
                }
                Err(e)
            }
        }
    }
}
