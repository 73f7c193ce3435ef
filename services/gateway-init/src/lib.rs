//! Gateway bootstrap coordinator.
//!
//! Brings a single agent gateway up inside a container, idempotently, no
//! matter how many launchers (entrypoint, timer, manual `start`) race:
//!
//! ```text
//! probe ──listening──▶ AlreadyRunning
//!   │
//!   ▼
//! lock ──held──▶ LockHeld
//!   │
//!   ▼
//! restore (if backup newer) ─▶ onboard (if no config) ─▶ patch ─▶ inject
//!   │
//!   ▼
//! persist ─▶ release lock ─▶ launch (exec | spawn)
//! ```
//!
//! ## Modules
//!
//! - `coordinator`: the bootstrap sequence
//! - `lock`: cross-process `flock` with takeover of abandoned locks
//! - `restore` / `sync`: backup store in and out
//! - `gateway`: the gateway process (real CLI and a mock for tests)
//! - `watch`: timer trigger
//! - `status`: read-only report

pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod gateway;
pub mod health;
pub mod lock;
pub mod logging;
pub mod marker;
pub mod restore;
pub mod status;
pub mod sync;
pub mod tree;
pub mod watch;

pub use config::BootstrapConfig;
pub use coordinator::{Coordinator, Outcome};
pub use error::BootstrapError;

/// Coordinator version (semver).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
