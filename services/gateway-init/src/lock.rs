//! Cross-process bootstrap lock.
//!
//! The lock is an exclusive `flock(2)` on a small file. The kernel drops it
//! when the holder's descriptor closes, including when the holder crashes,
//! so ownership never depends on pids or ages. The file body names the
//! holder for diagnostics only: it is written after the lock is taken and
//! truncated just before release. The file itself is never unlinked, so
//! every caller locks the same inode.
//!
//! Acquisition never waits: a held lock yields [`BootstrapError::LockHeld`].

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BootstrapError;

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn for_current_process() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// What currently sits at the lock path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    /// Locked. The holder is `None` while it is still writing its record.
    Held(Option<LockInfo>),
    /// Not locked, but a holder exited without clearing its record.
    Abandoned(Option<LockInfo>),
    /// Not a lockable file (a directory left by an older launcher, or no
    /// permission).
    Unreadable,
}

/// Held lock. Dropping it releases the lock.
pub struct LockGuard {
    path: PathBuf,
    file: Flock<File>,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Clear the record while still holding the lock; the flock itself
        // goes when `file` is dropped.
        match self.file.set_len(0) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to clear lock record"),
        }
    }
}

/// Acquire the bootstrap lock without blocking.
pub fn acquire(path: &Path) -> Result<LockGuard, BootstrapError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = match open_for_locking(path) {
        Ok(file) => file,
        Err(e) if path.is_dir() => {
            warn!(path = %path.display(), error = %e, "replacing lock path that is a directory");
            // Losing this removal to another caller is fine; only the
            // reopen below decides.
            let _ = fs::remove_dir_all(path);
            open_for_locking(path).map_err(|e| {
                BootstrapError::LockAcquireFailed(format!("{}: {}", path.display(), e))
            })?
        }
        Err(e) => return Err(e.into()),
    };

    let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(file) => file,
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
            let holder = read_record(path);
            return Err(BootstrapError::LockHeld {
                pid: holder.map(|info| info.pid),
            });
        }
        Err((_, errno)) => return Err(io::Error::from(errno).into()),
    };

    let mut previous = String::new();
    file.read_to_string(&mut previous)?;
    if !previous.trim().is_empty() {
        match serde_json::from_str::<LockInfo>(&previous) {
            Ok(old) => warn!(
                path = %path.display(),
                holder_pid = old.pid,
                acquired_at = %old.acquired_at,
                "taking over lock abandoned by previous holder"
            ),
            Err(_) => warn!(path = %path.display(), "discarding unreadable lock record"),
        }
    }

    let mine = LockInfo::for_current_process();
    file.set_len(0)?;
    file.rewind()?;
    file.write_all(&serde_json::to_vec(&mine).map_err(io::Error::from)?)?;
    file.sync_data()?;

    info!(path = %path.display(), pid = mine.pid, "lock acquired");
    Ok(LockGuard {
        path: path.to_path_buf(),
        file,
    })
}

/// Inspect the lock. Takes a shared lock for an instant when nobody holds
/// it, so it can race with, but never block, an acquisition.
pub fn read_state(path: &Path) -> LockState {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return LockState::Unreadable,
        Err(e) if e.kind() == ErrorKind::NotFound => return LockState::Free,
        Err(_) => return LockState::Unreadable,
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return LockState::Free,
        Err(_) => return LockState::Unreadable,
    };

    match Flock::lock(file, FlockArg::LockSharedNonblock) {
        Ok(mut file) => {
            let mut body = String::new();
            if file.read_to_string(&mut body).is_err() {
                return LockState::Unreadable;
            }
            if body.trim().is_empty() {
                LockState::Free
            } else {
                LockState::Abandoned(serde_json::from_str(&body).ok())
            }
        }
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => LockState::Held(read_record(path)),
        Err(_) => LockState::Unreadable,
    }
}

fn open_for_locking(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
}

fn read_record(path: &Path) -> Option<LockInfo> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::tempdir;

    /// Pid of a process that has already exited and been reaped.
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    fn write_record(path: &Path, info: &LockInfo) {
        fs::write(path, serde_json::to_vec(info).unwrap()).unwrap();
    }

    fn record(pid: u32) -> LockInfo {
        LockInfo {
            pid,
            acquired_at: Utc::now(),
        }
    }

    fn assert_held_by_us(state: LockState) {
        match state {
            LockState::Held(Some(info)) => assert_eq!(info.pid, std::process::id()),
            other => panic!("expected lock held by this process, got {:?}", other),
        }
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.lock");

        let guard = acquire(&path).unwrap();
        assert_held_by_us(read_state(&path));

        guard.release();
        assert_eq!(read_state(&path), LockState::Free);
        // The file stays so later callers lock the same inode.
        assert!(path.is_file());
    }

    #[test]
    fn test_holder_is_respected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.lock");

        let _held = acquire(&path).unwrap();
        match acquire(&path) {
            Err(BootstrapError::LockHeld { pid }) => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected LockHeld, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_after_dead_holder_admits_exactly_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.lock");
        let crashed = record(dead_pid());
        write_record(&path, &crashed);
        assert_eq!(read_state(&path), LockState::Abandoned(Some(crashed)));

        // First caller takes over the abandoned lock.
        let first = acquire(&path).unwrap();

        // Callers arriving after the takeover, in any order, all lose and
        // leave the winner's record alone.
        for _ in 0..2 {
            assert!(matches!(
                acquire(&path),
                Err(BootstrapError::LockHeld { .. })
            ));
            assert_held_by_us(read_state(&path));
        }

        drop(first);
        assert_eq!(read_state(&path), LockState::Free);
        drop(acquire(&path).unwrap());
    }

    #[test]
    fn test_concurrent_acquirers_single_winner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.lock");
        write_record(&path, &record(dead_pid()));

        let threads = 8;
        let start = Arc::new(Barrier::new(threads));
        let done = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let path = path.clone();
                let start = start.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    start.wait();
                    let result = acquire(&path);
                    // Hold any guard until every thread has tried.
                    done.wait();
                    result.is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(read_state(&path), LockState::Free);
    }

    #[test]
    fn test_crashed_holder_releases_without_clearing_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.lock");

        // A holder that dies keeps its record but loses the flock.
        let crashed = Flock::lock(open_for_locking(&path).unwrap(), FlockArg::LockExclusiveNonblock).unwrap();
        write_record(&path, &record(std::process::id()));
        assert!(matches!(read_state(&path), LockState::Held(Some(_))));
        drop(crashed);

        assert!(matches!(read_state(&path), LockState::Abandoned(Some(_))));
        let guard = acquire(&path).unwrap();
        assert_held_by_us(read_state(guard.path()));
    }

    #[test]
    fn test_record_naming_live_pid_does_not_hold_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.lock");
        // Fresh record naming a live process, but no flock behind it.
        write_record(&path, &record(std::process::id()));

        assert!(acquire(&path).is_ok());
    }

    #[test]
    fn test_unreadable_and_directory_locks_are_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.lock");

        fs::write(&path, b"not json").unwrap();
        assert_eq!(read_state(&path), LockState::Abandoned(None));
        drop(acquire(&path).unwrap());

        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        assert_eq!(read_state(&path), LockState::Unreadable);
        let guard = acquire(&path).unwrap();
        assert!(path.is_file());
        drop(guard);
    }

    #[test]
    fn test_missing_lock_is_free() {
        let dir = tempdir().unwrap();
        assert_eq!(read_state(&dir.path().join("none.lock")), LockState::Free);
    }
}
