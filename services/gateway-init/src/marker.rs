//! Sync markers: the only ordering signal between local and backup state.

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

/// Timestamp of the last sync. A missing marker orders before every present
/// marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SyncMarker(Option<DateTime<Utc>>);

impl SyncMarker {
    pub const MISSING: SyncMarker = SyncMarker(None);

    pub fn at(ts: DateTime<Utc>) -> Self {
        Self(Some(ts))
    }

    pub fn now() -> Self {
        Self(Some(Utc::now()))
    }

    /// Parse marker text. Unparseable text is a present marker at the Unix
    /// epoch.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::MISSING;
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Self(Some(ts.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
            return Self(Some(naive.and_utc()));
        }
        warn!(marker = %raw, "unparseable sync marker, treating as epoch");
        Self(Some(DateTime::<Utc>::UNIX_EPOCH))
    }

    /// Read a marker file. A missing or unreadable file is a missing marker.
    pub async fn read(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::parse(&raw),
            Err(e) if e.kind() == ErrorKind::NotFound => Self::MISSING,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read sync marker");
                Self::MISSING
            }
        }
    }

    /// Write the marker as RFC 3339. Writing a missing marker is a no-op.
    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        let Some(ts) = self.0 else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, format!("{}\n", ts.to_rfc3339())).await
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
    }
}

impl fmt::Display for SyncMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ts) => write!(f, "{}", ts.to_rfc3339()),
            None => write!(f, "missing"),
        }
    }
}

/// Restore iff the backup marker is strictly newer than the local one.
pub fn should_restore(backup: SyncMarker, local: SyncMarker) -> bool {
    backup > local
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;
    use tempfile::tempdir;

    fn ts(secs: i64) -> SyncMarker {
        SyncMarker::at(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[rstest]
    #[case("2024-01-01T00:00:00Z", 1704067200)]
    #[case("2024-01-01T01:00:00+01:00", 1704067200)]
    #[case("2024-01-01T00:00:00", 1704067200)]
    #[case("yesterday", 0)]
    fn test_parse(#[case] raw: &str, #[case] secs: i64) {
        assert_eq!(SyncMarker::parse(raw), ts(secs));
    }

    #[test]
    fn test_empty_is_missing() {
        assert_eq!(SyncMarker::parse("  \n"), SyncMarker::MISSING);
    }

    #[test]
    fn test_restore_decisions() {
        assert!(should_restore(ts(10), SyncMarker::MISSING));
        assert!(should_restore(ts(10), ts(5)));
        assert!(!should_restore(ts(10), ts(10)));
        assert!(!should_restore(SyncMarker::MISSING, SyncMarker::MISSING));
        assert!(!should_restore(SyncMarker::MISSING, ts(0)));
        // Garbage is older than any real marker but newer than none.
        assert!(should_restore(SyncMarker::parse("garbage"), SyncMarker::MISSING));
        assert!(!should_restore(SyncMarker::parse("garbage"), ts(1)));
    }

    #[tokio::test]
    async fn test_read_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(".last-sync");

        assert_eq!(SyncMarker::read(&path).await, SyncMarker::MISSING);
        ts(1704067200).write(&path).await.unwrap();
        assert_eq!(SyncMarker::read(&path).await, ts(1704067200));

        SyncMarker::MISSING.write(&dir.path().join("none")).await.unwrap();
        assert!(!dir.path().join("none").exists());
    }

    proptest! {
        #[test]
        fn prop_restore_iff_strictly_newer(
            backup in proptest::option::of(0i64..4_000_000_000),
            local in proptest::option::of(0i64..4_000_000_000),
        ) {
            let b = backup.map(ts).unwrap_or(SyncMarker::MISSING);
            let l = local.map(ts).unwrap_or(SyncMarker::MISSING);
            let expected = match (backup, local) {
                (Some(b), Some(l)) => b > l,
                (Some(_), None) => true,
                (None, _) => false,
            };
            prop_assert_eq!(should_restore(b, l), expected);
        }
    }
}
