//! Change detection for already-cataloged files.
//!
//! A file is considered unchanged when its size matches the stored row and
//! its mtime is within a small tolerance of the stored one. Unchanged files
//! are not re-hashed on rescan.

use chrono::{DateTime, Local};
use std::fs::Metadata;

use crate::db::{format_timestamp, parse_timestamp, ScanState};

/// Filesystems differ in mtime granularity (FAT has 2 s).
const TIMESTAMP_TOLERANCE_SECS: i64 = 2;

/// File mtime in the catalog's timestamp format.
pub fn file_modified_at(metadata: &Metadata) -> Option<String> {
    let modified = metadata.modified().ok()?;
    let local: DateTime<Local> = modified.into();
    Some(format_timestamp(&local.naive_local()))
}

pub fn is_unchanged(stored: &ScanState, size_bytes: u64, modified_at: Option<&str>) -> bool {
    if stored.size_bytes != size_bytes as i64 {
        return false;
    }
    match (stored.modified_at.as_deref(), modified_at) {
        (Some(a), Some(b)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(a), Some(b)) => (a - b).num_seconds().abs() <= TIMESTAMP_TOLERANCE_SECS,
            _ => a == b,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(size: i64, modified: Option<&str>) -> ScanState {
        ScanState {
            id: 1,
            size_bytes: size,
            modified_at: modified.map(String::from),
        }
    }

    #[test]
    fn test_unchanged_within_tolerance() {
        let stored = state(100, Some("2024-01-01 10:00:00"));
        assert!(is_unchanged(&stored, 100, Some("2024-01-01 10:00:01")));
        assert!(!is_unchanged(&stored, 100, Some("2024-01-01 10:00:05")));
    }

    #[test]
    fn test_size_change_forces_rescan() {
        let stored = state(100, Some("2024-01-01 10:00:00"));
        assert!(!is_unchanged(&stored, 101, Some("2024-01-01 10:00:00")));
    }

    #[test]
    fn test_unknown_mtime_forces_rescan() {
        assert!(!is_unchanged(&state(100, None), 100, Some("2024-01-01 10:00:00")));
        assert!(!is_unchanged(&state(100, Some("2024-01-01 10:00:00")), 100, None));
    }
}
