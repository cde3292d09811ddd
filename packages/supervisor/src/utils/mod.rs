// packages/supervisor/src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::SupervisorConfig;
pub use errors::{MountError, Result, StartupError, SupervisorError, SyncError};
