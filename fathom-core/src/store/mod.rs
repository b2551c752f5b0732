//! Persistence ports.
//!
//! Listing snapshots and scan checkpoints go through these traits. The
//! in-memory implementations are the default and carry the tests; the
//! file-backed ones give embedders restart survival without bringing a
//! database, and anything heavier can implement the traits itself.

mod file;

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use fathom_model::RootId;

use crate::error::Result;
use crate::resilience::cache::ListingSnapshot;

pub use file::{FileCheckpointStore, FileSnapshotStore};

/// Durable home for listing snapshots, so the offline cache survives a
/// process restart.
#[async_trait]
pub trait SnapshotStore: Send + Sync + fmt::Debug {
    async fn load(
        &self,
        root_id: RootId,
        path: &str,
    ) -> Result<Option<ListingSnapshot>>;

    async fn save(&self, snapshot: &ListingSnapshot) -> Result<()>;

    async fn delete(&self, root_id: RootId, path: &str) -> Result<()>;

    async fn forget_root(&self, root_id: RootId) -> Result<()>;
}

/// Progress marker for a resumable scan, keyed by root: at most one
/// interrupted scan per root is worth resuming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    /// Directories fully listed, root-relative.
    pub completed: Vec<String>,
    /// Directories discovered but not yet listed, with their depths.
    pub pending: Vec<(String, u32)>,
}

impl ScanCheckpoint {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.pending.is_empty()
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync + fmt::Debug {
    async fn load(&self, root_id: RootId) -> Result<Option<ScanCheckpoint>>;

    async fn save(
        &self,
        root_id: RootId,
        checkpoint: &ScanCheckpoint,
    ) -> Result<()>;

    async fn clear(&self, root_id: RootId) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    listings: DashMap<(RootId, String), ListingSnapshot>,
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(
        &self,
        root_id: RootId,
        path: &str,
    ) -> Result<Option<ListingSnapshot>> {
        Ok(self
            .listings
            .get(&(root_id, path.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, snapshot: &ListingSnapshot) -> Result<()> {
        self.listings.insert(
            (snapshot.root_id, snapshot.path.clone()),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn delete(&self, root_id: RootId, path: &str) -> Result<()> {
        self.listings.remove(&(root_id, path.to_string()));
        Ok(())
    }

    async fn forget_root(&self, root_id: RootId) -> Result<()> {
        self.listings.retain(|key, _| key.0 != root_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: DashMap<RootId, ScanCheckpoint>,
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, root_id: RootId) -> Result<Option<ScanCheckpoint>> {
        Ok(self
            .checkpoints
            .get(&root_id)
            .map(|entry| entry.value().clone()))
    }

    async fn save(
        &self,
        root_id: RootId,
        checkpoint: &ScanCheckpoint,
    ) -> Result<()> {
        self.checkpoints.insert(root_id, checkpoint.clone());
        Ok(())
    }

    async fn clear(&self, root_id: RootId) -> Result<()> {
        self.checkpoints.remove(&root_id);
        Ok(())
    }
}
