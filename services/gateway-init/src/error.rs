//! Error types for the bootstrap coordinator.

use thiserror::Error;

/// Bootstrap errors with standardized reason codes.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Another invocation holds the lock. `pid` is `None` when the holder
    /// has not written its record yet.
    #[error("lock_held: bootstrap already in progress (holder {})", describe_holder(.pid))]
    LockHeld { pid: Option<u32> },

    /// The lock path could not be turned into a lockable file.
    #[error("lock_acquire_failed: {0}")]
    LockAcquireFailed(String),

    /// Could not parse a JSON document.
    #[error("config_parse_failed: {0}")]
    ConfigParseFailed(String),

    /// Could not persist the configuration document.
    #[error("config_write_failed: {0}")]
    ConfigWriteFailed(String),

    /// First-boot onboarding did not complete.
    #[error("onboard_failed: {0}")]
    OnboardFailed(String),

    /// Could not start the gateway process.
    #[error("launch_failed: {0}")]
    LaunchFailed(String),

    /// Backup store is not mounted or not readable.
    #[error("backup_unavailable: {0}")]
    BackupUnavailable(String),

    /// Sync would overwrite a good backup with empty state.
    #[error("sync_refused: {0}")]
    SyncRefused(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_holder(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!("pid {}", pid),
        None => "unknown".to_string(),
    }
}

impl BootstrapError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            BootstrapError::LockHeld { .. } => "lock_held",
            BootstrapError::LockAcquireFailed(_) => "lock_acquire_failed",
            BootstrapError::ConfigParseFailed(_) => "config_parse_failed",
            BootstrapError::ConfigWriteFailed(_) => "config_write_failed",
            BootstrapError::OnboardFailed(_) => "onboard_failed",
            BootstrapError::LaunchFailed(_) => "launch_failed",
            BootstrapError::BackupUnavailable(_) => "backup_unavailable",
            BootstrapError::SyncRefused(_) => "sync_refused",
            BootstrapError::Io(_) => "io_error",
        }
    }

    /// True for errors caused by another invocation owning the bootstrap.
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self,
            BootstrapError::LockHeld { .. } | BootstrapError::LockAcquireFailed(_)
        )
    }
}
