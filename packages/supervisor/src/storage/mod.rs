// packages/supervisor/src/storage/mod.rs
//! Durable state for the gateway
//!
//! - **Mount**: binds a local path to the object storage bucket
//! - **Sync**: mirrors the state directory into the bucket and back
//!
//! # Layout
//!
//! ```text
//! /root/.openclaw/            local state (sync source)
//! /data/openclaw/             bucket mount point
//! ├─ .last-sync               report of the last successful sync
//! └─ openclaw/                mirror of the local state
//! ```

pub mod mount;
pub mod sync;

pub use mount::{Mounter, S3fsMounter, StorageBinding, StorageMount};
pub use sync::{StorageSync, SyncConfig, SyncReport};
