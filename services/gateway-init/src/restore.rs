//! Restore local state from the backup mount when the backup is newer.
//!
//! Each tree is copied under its own timeout. A failed or timed-out tree is
//! logged and skipped; the remaining trees are still restored. The local
//! marker is only advanced when every tree made it, so an incomplete restore
//! is retried on the next boot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{BootstrapConfig, CONFIG_FILE, LEGACY_CONFIG_FILE};
use crate::marker::{should_restore, SyncMarker};
use crate::tree::{copy_tree, CopyOptions};

/// Entries never restored into the local config tree.
const CONFIG_EXCLUDES: &[&str] = &["*.lock", "*.tmp", "*.log"];

/// Outcome of the restore step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Backup root missing; nothing to compare against.
    BackupUnavailable,
    /// Backup is not newer than local state.
    UpToDate {
        backup: SyncMarker,
        local: SyncMarker,
    },
    /// Backup was copied over local state.
    Restored {
        marker: SyncMarker,
        restored: Vec<&'static str>,
        failed: Vec<&'static str>,
    },
}

impl RestoreOutcome {
    pub fn is_complete(&self) -> bool {
        match self {
            RestoreOutcome::Restored { failed, .. } => failed.is_empty(),
            _ => true,
        }
    }
}

/// One tree to restore.
struct TreeCopy {
    name: &'static str,
    src: PathBuf,
    dst: PathBuf,
    exclude: &'static [&'static str],
}

/// Restore from backup iff its marker is strictly newer than the local one.
pub async fn restore_if_newer(config: &BootstrapConfig) -> RestoreOutcome {
    if !config.backup_root.is_dir() {
        info!(
            backup_root = %config.backup_root.display(),
            "backup store not mounted, skipping restore"
        );
        return RestoreOutcome::BackupUnavailable;
    }

    let backup = SyncMarker::read(&config.backup_marker()).await;
    let local = SyncMarker::read(&config.local_marker()).await;

    if !should_restore(backup, local) {
        info!(backup = %backup, local = %local, "local state is up to date");
        return RestoreOutcome::UpToDate { backup, local };
    }

    info!(backup = %backup, local = %local, "backup is newer, restoring");

    let mut restored = Vec::new();
    let mut failed = Vec::new();

    for tree in plan(config) {
        if !tree.src.is_dir() {
            info!(tree = tree.name, src = %tree.src.display(), "not in backup, skipping");
            continue;
        }
        if copy_bounded(&tree, config.copy_timeout).await {
            restored.push(tree.name);
        } else {
            failed.push(tree.name);
        }
    }

    if restored.contains(&"legacy-config") {
        migrate_legacy_document(&config.config_dir).await;
    }

    if failed.is_empty() {
        if let Err(e) = backup.write(&config.local_marker()).await {
            warn!(error = %e, "failed to record local sync marker");
        }
    } else {
        warn!(
            failed = ?failed,
            "restore incomplete, local marker not advanced; restore will be retried on next boot"
        );
    }

    RestoreOutcome::Restored {
        marker: backup,
        restored,
        failed,
    }
}

fn plan(config: &BootstrapConfig) -> Vec<TreeCopy> {
    let config_tree = if config.backup_config_dir().is_dir() {
        TreeCopy {
            name: "config",
            src: config.backup_config_dir(),
            dst: config.config_dir.clone(),
            exclude: CONFIG_EXCLUDES,
        }
    } else {
        TreeCopy {
            name: "legacy-config",
            src: config.backup_legacy_config_dir(),
            dst: config.config_dir.clone(),
            exclude: CONFIG_EXCLUDES,
        }
    };

    vec![
        config_tree,
        TreeCopy {
            name: "workspace",
            src: config.backup_workspace_dir(),
            dst: config.workspace_dir.clone(),
            exclude: &["skills"],
        },
        TreeCopy {
            name: "skills",
            src: config.backup_skills_dir(),
            dst: config.skills_dir.clone(),
            exclude: &[],
        },
    ]
}

async fn copy_bounded(tree: &TreeCopy, limit: Duration) -> bool {
    let options = CopyOptions {
        exclude: tree.exclude,
        delete_extraneous: false,
    };

    match timeout(limit, copy_tree(&tree.src, &tree.dst, options)).await {
        Ok(Ok(stats)) => {
            info!(
                tree = tree.name,
                files = stats.files,
                bytes = stats.bytes,
                "tree restored"
            );
            true
        }
        Ok(Err(e)) => {
            warn!(tree = tree.name, error = %e, "restore copy failed, continuing");
            false
        }
        Err(_) => {
            warn!(
                tree = tree.name,
                timeout_secs = limit.as_secs(),
                "restore copy timed out, continuing with partial state"
            );
            false
        }
    }
}

/// Rename a restored legacy document unless a current one already exists.
async fn migrate_legacy_document(config_dir: &Path) {
    let legacy = config_dir.join(LEGACY_CONFIG_FILE);
    let current = config_dir.join(CONFIG_FILE);
    if current.exists() || !legacy.exists() {
        return;
    }
    match tokio::fs::rename(&legacy, &current).await {
        Ok(()) => info!(from = %legacy.display(), to = %current.display(), "migrated legacy config"),
        Err(e) => warn!(error = %e, "failed to migrate legacy config"),
    }
}
