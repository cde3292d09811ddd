// packages/supervisor/src/lib.rs
//! Sandbox Gateway Supervisor Library
//!
//! Bootstrap and lifecycle layer for a chat-bot gateway running inside an
//! ephemeral sandbox: translates host configuration into the gateway's
//! environment and keeps exactly one gateway process alive, with its state
//! mirrored into object storage.
//!
//! # Architecture
//!
//! - **env**: host configuration snapshot and environment resolution
//! - **storage**: bucket mount, state sync and restore
//! - **runtime**: process discovery, launch, readiness and supervision
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration and error types

// Public module exports
pub mod env;
pub mod observability;
pub mod runtime;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use env::{resolve, RawConfig, ResolvedEnv};
pub use runtime::sandbox::{Sandbox, TeardownReport};
pub use runtime::supervisor::ProcessSupervisor;
pub use utils::config::SupervisorConfig;
pub use utils::errors::{Result, SupervisorError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
