//! Offline snapshot cache.
//!
//! Holds the last known listing and stat answers per `(root, path)` so the
//! resilient wrapper can keep serving reads while a backend is down.
//! Snapshots are immutable once inserted; a fresher fetch supersedes the
//! entry wholesale, and an older one arriving late is dropped. Age is
//! bounded by the staleness grace window, the entry count by `max_entries`
//! with oldest-first eviction.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fathom_config::CacheConfig;
use fathom_model::{FileRecord, RootId};

use crate::store::SnapshotStore;

type SnapshotKey = (RootId, String);

/// One directory listing as it looked at `fetched_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSnapshot {
    pub root_id: RootId,
    pub path: String,
    pub entries: Vec<FileRecord>,
    pub fetched_at: DateTime<Utc>,
}

/// One stat answer as it looked at `fetched_at`. Kept in memory only;
/// stat snapshots are cheap to rebuild and not worth persisting.
#[derive(Debug, Clone, PartialEq)]
pub struct StatSnapshot {
    pub record: FileRecord,
    pub fetched_at: DateTime<Utc>,
}

/// Freshness breakdown of the in-memory entries. `fresh` is within the
/// ttl, `aging` past it but still servable under the grace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotStats {
    pub fresh: usize,
    pub aging: usize,
}

pub struct SnapshotCache {
    config: CacheConfig,
    listings: DashMap<SnapshotKey, Arc<ListingSnapshot>>,
    stats: DashMap<SnapshotKey, Arc<StatSnapshot>>,
    /// Optional persistence for listings, surviving restarts.
    store: Option<Arc<dyn SnapshotStore>>,
}

impl SnapshotCache {
    pub fn new(config: CacheConfig) -> Self {
        SnapshotCache {
            config,
            listings: DashMap::new(),
            stats: DashMap::new(),
            store: None,
        }
    }

    pub fn with_store(
        config: CacheConfig,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        SnapshotCache {
            store: Some(store),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Live listings and stats currently held in memory.
    pub fn entry_count(&self) -> usize {
        self.listings.len() + self.stats.len()
    }

    pub fn snapshot_stats(&self) -> SnapshotStats {
        let ttl = self.config.ttl();
        let mut stats = SnapshotStats::default();
        for entry in self.listings.iter() {
            if age_of(entry.value().fetched_at) <= ttl {
                stats.fresh += 1;
            } else {
                stats.aging += 1;
            }
        }
        for entry in self.stats.iter() {
            if age_of(entry.value().fetched_at) <= ttl {
                stats.fresh += 1;
            } else {
                stats.aging += 1;
            }
        }
        stats
    }

    /// Record a fresh listing. Also written through to the store, best
    /// effort.
    pub async fn store_listing(
        &self,
        root_id: RootId,
        path: &str,
        entries: Vec<FileRecord>,
    ) {
        let snapshot = ListingSnapshot {
            root_id,
            path: path.to_string(),
            entries,
            fetched_at: Utc::now(),
        };
        if let Some(store) = &self.store
            && let Err(err) = store.save(&snapshot).await
        {
            warn!(root_id = %root_id, path, error = %err, "snapshot store write failed");
        }
        self.upsert_listing(Arc::new(snapshot));
    }

    pub fn store_stat(&self, root_id: RootId, path: &str, record: FileRecord) {
        let snapshot = Arc::new(StatSnapshot {
            record,
            fetched_at: Utc::now(),
        });
        let key = (root_id, path.to_string());
        self.stats
            .entry(key)
            .and_modify(|current| {
                if snapshot.fetched_at > current.fetched_at {
                    *current = snapshot.clone();
                }
            })
            .or_insert_with(|| snapshot.clone());
        self.enforce_capacity();
    }

    /// Last known listing, if one exists and is within the grace window.
    /// Falls back to the store on a memory miss.
    pub async fn serve_listing(
        &self,
        root_id: RootId,
        path: &str,
    ) -> Option<Arc<ListingSnapshot>> {
        let key = (root_id, path.to_string());
        let mut snapshot =
            self.listings.get(&key).map(|entry| entry.value().clone());

        if snapshot.is_none() && let Some(store) = &self.store {
            match store.load(root_id, path).await {
                Ok(Some(loaded)) => {
                    let loaded = Arc::new(loaded);
                    self.upsert_listing(loaded.clone());
                    snapshot = Some(loaded);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(root_id = %root_id, path, error = %err, "snapshot store read failed");
                }
            }
        }

        let snapshot = snapshot?;
        if age_of(snapshot.fetched_at) > self.config.staleness_grace() {
            debug!(root_id = %root_id, path, "snapshot past grace, evicting");
            self.listings.remove(&key);
            return None;
        }
        Some(snapshot)
    }

    pub fn serve_stat(
        &self,
        root_id: RootId,
        path: &str,
    ) -> Option<Arc<StatSnapshot>> {
        let key = (root_id, path.to_string());
        let snapshot =
            self.stats.get(&key).map(|entry| entry.value().clone())?;
        if age_of(snapshot.fetched_at) > self.config.staleness_grace() {
            self.stats.remove(&key);
            return None;
        }
        Some(snapshot)
    }

    /// Drop a listing snapshot after the directory's contents changed.
    pub async fn invalidate_listing(&self, root_id: RootId, path: &str) {
        self.listings.remove(&(root_id, path.to_string()));
        if let Some(store) = &self.store
            && let Err(err) = store.delete(root_id, path).await
        {
            warn!(root_id = %root_id, path, error = %err, "snapshot store delete failed");
        }
    }

    pub fn invalidate_stat(&self, root_id: RootId, path: &str) {
        self.stats.remove(&(root_id, path.to_string()));
    }

    /// Drop everything cached for a root, store included.
    pub async fn forget_root(&self, root_id: RootId) {
        self.listings.retain(|key, _| key.0 != root_id);
        self.stats.retain(|key, _| key.0 != root_id);
        if let Some(store) = &self.store
            && let Err(err) = store.forget_root(root_id).await
        {
            warn!(root_id = %root_id, error = %err, "snapshot store purge failed");
        }
    }

    fn upsert_listing(&self, snapshot: Arc<ListingSnapshot>) {
        let key = (snapshot.root_id, snapshot.path.clone());
        self.listings
            .entry(key)
            .and_modify(|current| {
                if snapshot.fetched_at > current.fetched_at {
                    *current = snapshot.clone();
                }
            })
            .or_insert_with(|| snapshot.clone());
        self.enforce_capacity();
    }

    fn enforce_capacity(&self) {
        while self.listings.len() + self.stats.len() > self.config.max_entries
        {
            let oldest_listing = self
                .listings
                .iter()
                .min_by_key(|entry| entry.value().fetched_at)
                .map(|entry| (entry.key().clone(), entry.value().fetched_at));
            let oldest_stat = self
                .stats
                .iter()
                .min_by_key(|entry| entry.value().fetched_at)
                .map(|entry| (entry.key().clone(), entry.value().fetched_at));
            match (oldest_listing, oldest_stat) {
                (Some((lkey, lat)), Some((skey, sat))) => {
                    if lat <= sat {
                        self.listings.remove(&lkey);
                    } else {
                        self.stats.remove(&skey);
                    }
                }
                (Some((lkey, _)), None) => {
                    self.listings.remove(&lkey);
                }
                (None, Some((skey, _))) => {
                    self.stats.remove(&skey);
                }
                (None, None) => break,
            }
        }
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("listings", &self.listings.len())
            .field("stats", &self.stats.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

fn age_of(fetched_at: DateTime<Utc>) -> Duration {
    (Utc::now() - fetched_at).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySnapshotStore;
    use fathom_model::FileKind;

    fn listing_at(
        root_id: RootId,
        path: &str,
        fetched_at: DateTime<Utc>,
    ) -> Arc<ListingSnapshot> {
        Arc::new(ListingSnapshot {
            root_id,
            path: path.to_string(),
            entries: vec![FileRecord::new(
                root_id,
                format!("{path}/file.mkv"),
                FileKind::File,
            )],
            fetched_at,
        })
    }

    #[tokio::test]
    async fn fresher_snapshot_supersedes() {
        let cache = SnapshotCache::new(CacheConfig::default());
        let root = RootId::new();
        let old = Utc::now() - chrono::Duration::minutes(10);
        let new = Utc::now();

        cache.upsert_listing(listing_at(root, "a", old));
        cache.upsert_listing(listing_at(root, "a", new));
        let served = cache.serve_listing(root, "a").await.unwrap();
        assert_eq!(served.fetched_at, new);

        // A late arrival from a slow retry must not roll the entry back.
        cache.upsert_listing(listing_at(root, "a", old));
        let served = cache.serve_listing(root, "a").await.unwrap();
        assert_eq!(served.fetched_at, new);
    }

    #[tokio::test]
    async fn grace_window_bounds_serving() {
        let config = CacheConfig {
            staleness_grace_ms: 3_600_000,
            ..CacheConfig::default()
        };
        let cache = SnapshotCache::new(config);
        let root = RootId::new();

        let stale = Utc::now() - chrono::Duration::hours(2);
        cache.upsert_listing(listing_at(root, "old", stale));
        assert!(cache.serve_listing(root, "old").await.is_none());
        assert_eq!(cache.entry_count(), 0);

        let recent = Utc::now() - chrono::Duration::minutes(2);
        cache.upsert_listing(listing_at(root, "recent", recent));
        assert!(cache.serve_listing(root, "recent").await.is_some());
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };
        let cache = SnapshotCache::new(config);
        let root = RootId::new();
        let base = Utc::now();

        cache.upsert_listing(listing_at(
            root,
            "a",
            base - chrono::Duration::minutes(3),
        ));
        cache.upsert_listing(listing_at(
            root,
            "b",
            base - chrono::Duration::minutes(2),
        ));
        cache.upsert_listing(listing_at(
            root,
            "c",
            base - chrono::Duration::minutes(1),
        ));

        assert_eq!(cache.entry_count(), 2);
        assert!(cache.serve_listing(root, "a").await.is_none());
        assert!(cache.serve_listing(root, "b").await.is_some());
        assert!(cache.serve_listing(root, "c").await.is_some());
    }

    #[tokio::test]
    async fn store_round_trip_survives_memory_loss() {
        let store = Arc::new(MemorySnapshotStore::default());
        let root = RootId::new();

        let warm =
            SnapshotCache::with_store(CacheConfig::default(), store.clone());
        warm.store_listing(
            root,
            "media",
            vec![FileRecord::new(root, "media/x.mkv", FileKind::File)],
        )
        .await;

        // Fresh cache, same store: the listing comes back from disk.
        let cold =
            SnapshotCache::with_store(CacheConfig::default(), store.clone());
        let served = cold.serve_listing(root, "media").await.unwrap();
        assert_eq!(served.entries.len(), 1);

        cold.invalidate_listing(root, "media").await;
        let colder = SnapshotCache::with_store(CacheConfig::default(), store);
        assert!(colder.serve_listing(root, "media").await.is_none());
    }

    #[tokio::test]
    async fn snapshot_stats_split_on_ttl() {
        let cache = SnapshotCache::new(CacheConfig::default());
        let root = RootId::new();
        cache.upsert_listing(listing_at(root, "fresh", Utc::now()));
        cache.upsert_listing(listing_at(
            root,
            "aging",
            Utc::now() - chrono::Duration::minutes(10),
        ));

        let stats = cache.snapshot_stats();
        assert_eq!(stats.fresh, 1);
        assert_eq!(stats.aging, 1);
    }

    #[tokio::test]
    async fn forget_root_is_scoped() {
        let cache = SnapshotCache::new(CacheConfig::default());
        let kept = RootId::new();
        let dropped = RootId::new();
        cache.upsert_listing(listing_at(kept, "a", Utc::now()));
        cache.upsert_listing(listing_at(dropped, "a", Utc::now()));
        cache.store_stat(
            dropped,
            "a/file.mkv",
            FileRecord::new(dropped, "a/file.mkv", FileKind::File),
        );

        cache.forget_root(dropped).await;
        assert!(cache.serve_listing(kept, "a").await.is_some());
        assert!(cache.serve_listing(dropped, "a").await.is_none());
        assert!(cache.serve_stat(dropped, "a/file.mkv").is_none());
    }
}
