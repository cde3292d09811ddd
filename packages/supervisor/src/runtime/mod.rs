// packages/supervisor/src/runtime/mod.rs
//! Gateway process supervision
//!
//! - **Process Finder**: detects a gateway already running in the sandbox
//! - **Process Manager**: launches and terminates the gateway process
//! - **Readiness**: polls a liveness signal with a bounded timeout
//! - **Supervisor**: find-or-create under a sandbox-scoped lock
//! - **Sandbox**: activation and teardown around all of the above
//!
//! # Architecture
//!
//! ```text
//!  request ─► Sandbox::ensure_gateway ─► ProcessSupervisor (lock)
//!                                           │
//!                      ┌────────────────────┼───────────────────┐
//!                      ▼                    ▼                   ▼
//!                ProcessFinder        ProcessManager      ReadinessWaiter
//!               (process table)      (spawn / signal)     (port / marker)
//! ```

pub mod handle;
pub mod process_finder;
pub mod process_manager;
pub mod readiness;
pub mod sandbox;
pub mod supervisor;

// Re-export commonly used types
pub use handle::{Liveness, Origin, ProcessHandle};
pub use process_finder::{ProcessFinder, ProcessTable, SysinfoProcessTable};
pub use process_manager::{Launcher, ProcessManager, SpawnConfig};
pub use readiness::{LivenessProbe, MarkerFileProbe, PortProbe, ReadinessWaiter};
pub use sandbox::{FinalSync, Sandbox, SandboxParts, TeardownReport};
pub use supervisor::ProcessSupervisor;
