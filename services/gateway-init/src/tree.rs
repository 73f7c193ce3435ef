//! Directory tree copies between local state and the backup mount.
//!
//! Copies are async so a timeout around them stops the copy at the next
//! file boundary instead of leaving a detached worker running.

use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

/// How a tree copy treats the destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions<'a> {
    /// Entry names to skip. `*.ext` matches by suffix, anything else by
    /// exact name.
    pub exclude: &'a [&'a str],

    /// Remove destination entries that do not exist in the source.
    pub delete_extraneous: bool,
}

/// Counters for a finished copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub removed: u64,
}

pub fn is_excluded(name: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|pattern| match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == *pattern,
    })
}

/// Copy `src` into `dst`, creating `dst` if needed.
pub async fn copy_tree(src: &Path, dst: &Path, options: CopyOptions<'_>) -> io::Result<CopyStats> {
    let mut stats = CopyStats::default();
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        stats.dirs += 1;

        let mut seen: HashSet<OsString> = HashSet::new();
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if is_excluded(&name.to_string_lossy(), options.exclude) {
                continue;
            }
            seen.insert(name.clone());

            let src_path = entry.path();
            let dst_path = to.join(&name);
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                if is_non_dir(&dst_path).await {
                    fs::remove_file(&dst_path).await?;
                }
                pending.push((src_path, dst_path));
            } else if file_type.is_symlink() {
                let target = fs::read_link(&src_path).await?;
                remove_existing(&dst_path).await?;
                fs::symlink(&target, &dst_path).await?;
                stats.files += 1;
            } else {
                if is_dir(&dst_path).await {
                    fs::remove_dir_all(&dst_path).await?;
                }
                stats.bytes += fs::copy(&src_path, &dst_path).await?;
                stats.files += 1;
            }
        }

        if options.delete_extraneous {
            stats.removed += remove_extraneous(&to, &seen, options.exclude).await?;
        }
    }

    debug!(
        src = %src.display(),
        dst = %dst.display(),
        files = stats.files,
        bytes = stats.bytes,
        removed = stats.removed,
        "tree copied"
    );
    Ok(stats)
}

async fn remove_extraneous(dir: &Path, keep: &HashSet<OsString>, exclude: &[&str]) -> io::Result<u64> {
    let mut removed = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if keep.contains(&name) || is_excluded(&name.to_string_lossy(), exclude) {
            continue;
        }
        remove_existing(&entry.path()).await?;
        removed += 1;
    }
    Ok(removed)
}

async fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_non_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .await
        .map(|m| !m.is_dir())
        .unwrap_or(false)
}
