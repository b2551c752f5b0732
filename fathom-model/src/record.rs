use chrono::{DateTime, Utc};

use crate::ids::RootId;

/// What kind of entry a [`FileRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// One catalogued filesystem entry, as reported by a storage client or
/// emitted by a scan.
///
/// `path` is always relative to the storage root and uses `/` separators
/// regardless of backend.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileRecord {
    pub root_id: RootId,
    pub path: String,
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
}

impl FileRecord {
    pub fn new(
        root_id: RootId,
        path: impl Into<String>,
        kind: FileKind,
    ) -> Self {
        let path = path.into();
        let name = name_of(&path);
        FileRecord {
            root_id,
            path,
            name,
            kind,
            size: 0,
            modified: None,
            content_hash: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Lowercased extension, if the name carries one.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Final component of a `/`-separated relative path. The root itself
/// (`""` or `"/"`) yields an empty name.
pub fn name_of(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
