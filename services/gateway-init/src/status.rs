//! Read-only status report.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::BootstrapConfig;
use crate::health;
use crate::lock::{self, LockState};
use crate::marker::{should_restore, SyncMarker};

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub port: u16,
    pub listening: bool,
    pub lock: LockStatus,
    pub config_present: bool,
    pub backup_mounted: bool,
    pub local_marker: Option<DateTime<Utc>>,
    pub backup_marker: Option<DateTime<Utc>>,
    pub would_restore: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockStatus {
    Free,
    Held {
        pid: Option<u32>,
        acquired_at: Option<DateTime<Utc>>,
    },
    /// Left behind by a holder that exited without releasing; the next
    /// bootstrap takes it over.
    Abandoned {
        pid: Option<u32>,
        acquired_at: Option<DateTime<Utc>>,
    },
    Unreadable,
}

/// Inspect the gateway, lock and markers without changing anything.
pub async fn collect(config: &BootstrapConfig) -> StatusReport {
    let listening = health::probe(config.port, config.probe_timeout)
        .await
        .is_listening();

    let lock = match lock::read_state(&config.lock_path) {
        LockState::Free => LockStatus::Free,
        LockState::Held(info) => LockStatus::Held {
            pid: info.as_ref().map(|i| i.pid),
            acquired_at: info.map(|i| i.acquired_at),
        },
        LockState::Abandoned(info) => LockStatus::Abandoned {
            pid: info.as_ref().map(|i| i.pid),
            acquired_at: info.map(|i| i.acquired_at),
        },
        LockState::Unreadable => LockStatus::Unreadable,
    };

    let backup_mounted = config.backup_root.is_dir();
    let local = SyncMarker::read(&config.local_marker()).await;
    let backup = if backup_mounted {
        SyncMarker::read(&config.backup_marker()).await
    } else {
        SyncMarker::MISSING
    };

    StatusReport {
        port: config.port,
        listening,
        lock,
        config_present: config.config_file().is_file(),
        backup_mounted,
        local_marker: local.timestamp(),
        backup_marker: backup.timestamp(),
        would_restore: backup_mounted && should_restore(backup, local),
    }
}
