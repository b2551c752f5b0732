use chrono::{DateTime, Utc};

use crate::ids::RootId;

/// Classification of a raw filesystem notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChangeKind {
    Created,
    Modified,
    Renamed,
    Removed,
}

/// A debounced change notification for one path under a storage root.
///
/// `generation` counts raw observations of the path since the watcher
/// started; it is strictly increasing per path, so consumers can order and
/// deduplicate events. A burst of N raw updates that settles inside one
/// debounce window produces a single event carrying generation N.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangeEvent {
    pub root_id: RootId,
    pub path: String,
    pub kind: ChangeKind,
    pub generation: u64,
    pub observed_at: DateTime<Utc>,
}
