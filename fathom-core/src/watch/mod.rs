//! Debounced change notifications across storage roots.
//!
//! Local roots use native OS notifications; network roots fall back to a
//! listing-diff poller. Both feed the same per-path debouncer, so
//! subscribers see one uniform [`ChangeEvent`] stream regardless of how a
//! root is watched.

pub mod debounce;
mod notify_backend;
mod poll;

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fathom_config::{StorageRootConfig, WatchConfig};
use fathom_model::{ChangeEvent, Protocol, RootId};

use crate::client::StorageClient;
use crate::error::{FsError, Result};

pub use debounce::Debouncer;

use notify_backend::LocalWatch;
use poll::PollWatch;

#[derive(Debug)]
struct WatchTask {
    shutdown: CancellationToken,
    // Detached on drop; the task exits once it observes the token.
    _task: JoinHandle<()>,
}

/// Owns one watch task per registered root and the shared debouncer they
/// feed.
#[derive(Debug)]
pub struct ChangeWatchService {
    config: WatchConfig,
    events: broadcast::Sender<ChangeEvent>,
    debouncer: Arc<Debouncer>,
    watches: DashMap<RootId, WatchTask>,
}

impl ChangeWatchService {
    pub fn new(config: WatchConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let debouncer = Arc::new(Debouncer::new(
            config.debounce_window(),
            events.clone(),
        ));
        ChangeWatchService {
            config,
            events,
            debouncer,
            watches: DashMap::new(),
        }
    }

    /// Settled change events for every watched root. Slow subscribers lose
    /// the oldest events once the buffer laps them.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Start watching a root; a second registration for the same root is a
    /// no-op. Local roots must name an existing base directory.
    pub fn register(
        &self,
        client: Arc<dyn StorageClient>,
        config: &StorageRootConfig,
    ) -> Result<()> {
        let root_id = client.root_id();
        if self.watches.contains_key(&root_id) {
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let task = match client.protocol() {
            Protocol::Local => {
                if config.path.trim().is_empty() {
                    return Err(FsError::Config(format!(
                        "root {}: watching a local root needs a base path",
                        config.name
                    )));
                }
                let watch = LocalWatch::start(
                    root_id,
                    PathBuf::from(&config.path),
                )?;
                tokio::spawn(
                    watch.run(self.debouncer.clone(), shutdown.clone()),
                )
            }
            _ => {
                let poll = PollWatch::new(
                    client,
                    self.config.poll_interval(),
                    config.depth_limit(),
                );
                tokio::spawn(
                    poll.run(self.debouncer.clone(), shutdown.clone()),
                )
            }
        };

        self.watches.insert(
            root_id,
            WatchTask {
                shutdown,
                _task: task,
            },
        );
        info!(root_id = %root_id, root = %config.name, "change watch registered");
        Ok(())
    }

    /// Stop watching a root; undelivered debounced events for it are
    /// dropped.
    pub fn unregister(&self, root_id: RootId) {
        if let Some((_, watch)) = self.watches.remove(&root_id) {
            watch.shutdown.cancel();
            self.debouncer.forget_root(root_id);
            info!(root_id = %root_id, "change watch unregistered");
        }
    }

    pub fn is_watching(&self, root_id: RootId) -> bool {
        self.watches.contains_key(&root_id)
    }

    /// Stop every watch task and drop pending debounce windows.
    pub fn shutdown(&self) {
        for entry in self.watches.iter() {
            entry.value().shutdown.cancel();
        }
        self.watches.clear();
        self.debouncer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LocalClient;

    #[tokio::test]
    async fn registration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root_id = RootId::new();
        let client: Arc<dyn StorageClient> =
            Arc::new(LocalClient::new(root_id, dir.path()));
        let mut config = StorageRootConfig::named("lib", "local");
        config.path = dir.path().to_string_lossy().into_owned();

        let service = ChangeWatchService::new(WatchConfig::default());
        service.register(client.clone(), &config).unwrap();
        service.register(client, &config).unwrap();
        assert!(service.is_watching(root_id));
        assert_eq!(service.watches.len(), 1);

        service.unregister(root_id);
        assert!(!service.is_watching(root_id));
    }

    #[tokio::test]
    async fn local_root_without_path_is_rejected() {
        let root_id = RootId::new();
        let client: Arc<dyn StorageClient> =
            Arc::new(LocalClient::new(root_id, "/nonexistent"));
        let config = StorageRootConfig::named("empty", "local");

        let service = ChangeWatchService::new(WatchConfig::default());
        let err = service.register(client, &config).unwrap_err();
        assert!(matches!(err, FsError::Config(_)));
    }
}
