//! Loading and persisting JSON documents (gateway config, credential store).
//!
//! Writes are atomic: temp file, fsync, rename. Documents can hold tokens,
//! so they are written owner-only.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use crate::error::BootstrapError;

/// Permissions for persisted documents.
const DOCUMENT_MODE: u32 = 0o600;

/// Load a JSON document. `Ok(None)` if it does not exist.
pub fn load(path: &Path) -> Result<Option<Value>, BootstrapError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| BootstrapError::ConfigParseFailed(format!("{}: {}", path.display(), e)))
}

/// Load a document, moving an unparseable one aside and returning `{}`.
///
/// The moved file keeps the damaged contents observable instead of losing
/// them to the next persist.
pub fn load_or_quarantine(path: &Path) -> Result<Value, BootstrapError> {
    match load(path) {
        Ok(Some(doc)) => Ok(doc),
        Ok(None) => Ok(Value::Object(Default::default())),
        Err(BootstrapError::ConfigParseFailed(detail)) => {
            let moved = quarantine_path(path);
            fs::rename(path, &moved)?;
            warn!(
                path = %path.display(),
                moved_to = %moved.display(),
                detail = %detail,
                "unparseable document moved aside, starting from empty"
            );
            Ok(Value::Object(Default::default()))
        }
        Err(e) => Err(e),
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{}", chrono::Utc::now().format("%Y%m%dT%H%M%SZ")));
    PathBuf::from(name)
}

/// Persist a document atomically.
pub fn persist(path: &Path, doc: &Value) -> Result<(), BootstrapError> {
    let write_failed = |what: &str, e: std::io::Error| {
        BootstrapError::ConfigWriteFailed(format!("{} {}: {}", what, path.display(), e))
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| write_failed("create directory for", e))?;
    }

    let contents = serde_json::to_string_pretty(doc)
        .map_err(|e| BootstrapError::ConfigWriteFailed(e.to_string()))?;

    let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    let result = write_synced(&tmp_path, contents.as_bytes())
        .map_err(|e| write_failed("write", e))
        .and_then(|()| fs::rename(&tmp_path, path).map_err(|e| write_failed("rename onto", e)));

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    } else {
        info!(path = %path.display(), bytes = contents.len(), "document persisted");
    }
    result
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(DOCUMENT_MODE)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    // Make sure the rename target directory entry is durable too.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
