//! Backup sync: mirror local state into the backup store.
//!
//! Both markers are written with the same timestamp after the copies
//! succeed, so the next boot sees local and backup as equal and skips the
//! restore.

use tracing::info;

use crate::config::{BootstrapConfig, MARKER_FILE};
use crate::error::BootstrapError;
use crate::marker::SyncMarker;
use crate::tree::{copy_tree, CopyOptions, CopyStats};

/// Entries never synced from the local config tree. The marker is written
/// separately once every tree is copied.
const CONFIG_EXCLUDES: &[&str] = &["*.lock", "*.log", "*.tmp", MARKER_FILE];

/// Entries never synced from the workspace. Skills are synced on their own.
const WORKSPACE_EXCLUDES: &[&str] = &["skills", ".git", "node_modules"];

fn mirror(exclude: &'static [&'static str]) -> CopyOptions<'static> {
    CopyOptions {
        exclude,
        delete_extraneous: true,
    }
}

/// Summary of a finished sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub marker: SyncMarker,
    pub config: CopyStats,
    pub workspace: CopyStats,
    pub skills: CopyStats,
}

/// Copy local state to the backup store and advance both markers.
pub async fn sync_to_backup(config: &BootstrapConfig) -> Result<SyncReport, BootstrapError> {
    if !config.backup_root.is_dir() {
        return Err(BootstrapError::BackupUnavailable(format!(
            "{} is not mounted",
            config.backup_root.display()
        )));
    }
    if !config.config_file().is_file() {
        return Err(BootstrapError::SyncRefused(format!(
            "{} does not exist, refusing to overwrite backup with empty state",
            config.config_file().display()
        )));
    }

    let config_stats = copy_tree(&config.config_dir, &config.backup_config_dir(), mirror(CONFIG_EXCLUDES)).await?;

    let workspace_stats = if config.workspace_dir.is_dir() {
        copy_tree(&config.workspace_dir, &config.backup_workspace_dir(), mirror(WORKSPACE_EXCLUDES)).await?
    } else {
        CopyStats::default()
    };

    let skills_stats = if config.skills_dir.is_dir() {
        copy_tree(&config.skills_dir, &config.backup_skills_dir(), mirror(&[])).await?
    } else {
        CopyStats::default()
    };

    let marker = SyncMarker::now();
    marker.write(&config.backup_marker()).await?;
    marker.write(&config.local_marker()).await?;

    info!(
        marker = %marker,
        config_files = config_stats.files,
        workspace_files = workspace_stats.files,
        skills_files = skills_stats.files,
        "backup sync complete"
    );

    Ok(SyncReport {
        marker,
        config: config_stats,
        workspace: workspace_stats,
        skills: skills_stats,
    })
}
