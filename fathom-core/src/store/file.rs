//! JSON-on-disk implementations of the persistence ports.
//!
//! Checkpoints live at `<base>/<root_id>.json`; listing snapshots at
//! `<base>/<root_id>/<digest>.json`, where the digest is the hex SHA-256
//! of the listed path, since listing paths carry separators and arbitrary
//! unicode. Writes land in a sibling temp file and rename into place, so a
//! crash mid-write leaves the previous version readable.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use fathom_model::RootId;

use crate::error::{FsError, Result};
use crate::resilience::cache::ListingSnapshot;
use crate::store::{CheckpointStore, ScanCheckpoint, SnapshotStore};

/// Scan checkpoints as one JSON file per root.
#[derive(Debug)]
pub struct FileCheckpointStore {
    base: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileCheckpointStore { base: base.into() }
    }

    fn path_for(&self, root_id: RootId) -> PathBuf {
        self.base.join(format!("{root_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, root_id: RootId) -> Result<Option<ScanCheckpoint>> {
        read_json(&self.path_for(root_id)).await
    }

    async fn save(
        &self,
        root_id: RootId,
        checkpoint: &ScanCheckpoint,
    ) -> Result<()> {
        write_json(&self.base, &self.path_for(root_id), checkpoint).await
    }

    async fn clear(&self, root_id: RootId) -> Result<()> {
        remove_if_present(&self.path_for(root_id)).await
    }
}

/// Listing snapshots as one JSON file per `(root, path)`.
#[derive(Debug)]
pub struct FileSnapshotStore {
    base: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileSnapshotStore { base: base.into() }
    }

    fn root_dir(&self, root_id: RootId) -> PathBuf {
        self.base.join(root_id.to_string())
    }

    fn path_for(&self, root_id: RootId, path: &str) -> PathBuf {
        let digest = Sha256::digest(path.as_bytes());
        self.root_dir(root_id)
            .join(format!("{}.json", hex::encode(digest)))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(
        &self,
        root_id: RootId,
        path: &str,
    ) -> Result<Option<ListingSnapshot>> {
        read_json(&self.path_for(root_id, path)).await
    }

    async fn save(&self, snapshot: &ListingSnapshot) -> Result<()> {
        let target = self.path_for(snapshot.root_id, &snapshot.path);
        write_json(&self.root_dir(snapshot.root_id), &target, snapshot).await
    }

    async fn delete(&self, root_id: RootId, path: &str) -> Result<()> {
        remove_if_present(&self.path_for(root_id, path)).await
    }

    async fn forget_root(&self, root_id: RootId) -> Result<()> {
        match fs::remove_dir_all(self.root_dir(root_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FsError::from_io("purge snapshot directory", err)),
        }
    }
}

/// Missing files and unreadable contents both come back as `None`; a torn
/// write or a hand-edited file degrades to a miss instead of an error.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(FsError::from_io("read store file", err)),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            debug!(
                path = %path.display(),
                error = %err,
                "discarding unreadable store file"
            );
            Ok(None)
        }
    }
}

async fn write_json<T: Serialize>(
    dir: &Path,
    target: &Path,
    value: &T,
) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|err| FsError::from_io("create store directory", err))?;
    let bytes = serde_json::to_vec(value)
        .map_err(|err| FsError::Internal(format!("encode store file: {err}")))?;
    let staged = target.with_extension("json.tmp");
    fs::write(&staged, &bytes)
        .await
        .map_err(|err| FsError::from_io("stage store file", err))?;
    fs::rename(&staged, target)
        .await
        .map_err(|err| FsError::from_io("commit store file", err))
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FsError::from_io("remove store file", err)),
    }
}
