// packages/supervisor/src/env/mod.rs
//! Environment translation
//!
//! - **RawConfig**: typed snapshot of the host-supplied key families
//! - **Resolver**: pure mapping to the gateway process environment

pub mod raw_config;
pub mod resolver;

pub use raw_config::{utf8_vars, RawConfig, StorageCredentials};
pub use resolver::{normalize_base_url, resolve, ResolvedEnv};
