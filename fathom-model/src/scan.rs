use chrono::{DateTime, Utc};

use crate::ids::{RootId, ScanId};

/// One directory the scanner failed to list. The scan itself carries on;
/// these aggregate in the [`ScanReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanError {
    pub path: String,
    pub error: String,
}

/// Final accounting for one scan run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanReport {
    pub scan_id: ScanId,
    pub root_id: RootId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dirs_listed: u64,
    pub files_emitted: u64,
    pub bytes_seen: u64,
    pub hash_failures: u64,
    pub errors: Vec<ScanError>,
    /// False when the scan was cancelled or hit its deadline.
    pub completed: bool,
    /// True when the scan skipped directories recorded by a prior checkpoint.
    pub resumed: bool,
}

impl ScanReport {
    pub fn begin(scan_id: ScanId, root_id: RootId) -> Self {
        ScanReport {
            scan_id,
            root_id,
            started_at: Utc::now(),
            finished_at: None,
            dirs_listed: 0,
            files_emitted: 0,
            bytes_seen: 0,
            hash_failures: 0,
            errors: Vec::new(),
            completed: false,
            resumed: false,
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}
