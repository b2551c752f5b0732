//! The storage manager facade.
//!
//! One object owns the whole stack: the validating factory, the shared
//! snapshot cache and breaker registry, the scanner, the change watcher,
//! and the health monitor. Embedding services register roots here and get
//! back clients, scan handles, and event streams without touching the
//! individual services.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fathom_config::{FathomConfig, StorageRootConfig};
use fathom_model::{ChangeEvent, HealthReport, RootId};

use crate::client::StorageClient;
use crate::context::OpContext;
use crate::error::{FsError, Result};
use crate::factory::ClientFactory;
use crate::health::HealthMonitor;
use crate::resilience::{SnapshotCache, SnapshotStats};
use crate::scan::{ScanHandle, ScanOptions, Scanner};
use crate::store::{
    CheckpointStore, MemoryCheckpointStore, SnapshotStore,
};
use crate::watch::ChangeWatchService;

#[derive(Debug)]
struct RegisteredRoot {
    config: StorageRootConfig,
    client: Arc<dyn StorageClient>,
}

#[derive(Debug)]
pub struct StorageManager {
    config: FathomConfig,
    factory: ClientFactory,
    scanner: Scanner,
    checkpoints: Arc<dyn CheckpointStore>,
    watch: ChangeWatchService,
    health: Arc<HealthMonitor>,
    roots: DashMap<RootId, RegisteredRoot>,
    names: DashMap<String, RootId>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl StorageManager {
    /// Manager with in-memory persistence; snapshots and checkpoints do
    /// not survive a restart.
    pub fn new(config: FathomConfig) -> Self {
        Self::with_stores(
            config,
            None,
            Arc::new(MemoryCheckpointStore::default()),
        )
    }

    /// Manager backed by durable stores supplied by the embedding service.
    pub fn with_stores(
        config: FathomConfig,
        snapshots: Option<Arc<dyn SnapshotStore>>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let cache = Arc::new(match snapshots {
            Some(store) => SnapshotCache::with_store(
                config.resilience.cache.clone(),
                store,
            ),
            None => SnapshotCache::new(config.resilience.cache.clone()),
        });
        let factory = ClientFactory::new(config.resilience.clone(), cache);
        let scanner =
            Scanner::new(config.scanner.clone(), checkpoints.clone());
        let watch = ChangeWatchService::new(config.watch.clone());
        let health = Arc::new(HealthMonitor::new(config.health.clone()));

        StorageManager {
            config,
            factory,
            scanner,
            checkpoints,
            watch,
            health,
            roots: DashMap::new(),
            names: DashMap::new(),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Load configuration from the environment and register every enabled
    /// root. A root that fails validation is logged and skipped so one bad
    /// entry does not take the whole catalog down.
    pub fn from_env() -> Result<Self> {
        let (config, source) = FathomConfig::load_from_env()
            .map_err(|err| FsError::Config(err.to_string()))?;
        info!(
            source = ?source,
            roots = config.roots.len(),
            "configuration loaded"
        );
        let manager = Self::new(config);
        manager.register_configured();
        Ok(manager)
    }

    /// Register every enabled root from the loaded configuration. Returns
    /// how many registered successfully.
    pub fn register_configured(&self) -> usize {
        let declared: Vec<StorageRootConfig> =
            self.config.enabled_roots().cloned().collect();
        let mut registered = 0;
        for root in declared {
            let name = root.name.clone();
            match self.register_root(root) {
                Ok(_) => registered += 1,
                Err(err) => {
                    warn!(
                        root = %name,
                        error = %err,
                        "configured root failed to register"
                    );
                }
            }
        }
        registered
    }

    /// Start background services (periodic health probes). Idempotent;
    /// must run inside a tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(self.health.clone().run());
    }

    pub fn config(&self) -> &FathomConfig {
        &self.config
    }

    /// Validate, build, and wire one root into every service. The returned
    /// id comes from the config when pinned there, otherwise it is
    /// generated.
    pub fn register_root(
        &self,
        config: StorageRootConfig,
    ) -> Result<RootId> {
        if config.name.trim().is_empty() {
            return Err(FsError::Config(
                "root name must not be empty".to_string(),
            ));
        }
        let root_id = config.id.map(RootId).unwrap_or_else(RootId::new);
        if self.roots.contains_key(&root_id) {
            return Err(FsError::Config(format!(
                "root id {root_id} is already registered"
            )));
        }
        match self.names.entry(config.name.clone()) {
            Entry::Occupied(_) => {
                return Err(FsError::Config(format!(
                    "root name {:?} is already registered",
                    config.name
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(root_id);
            }
        }

        let client = match self.factory.build(root_id, &config) {
            Ok(client) => client,
            Err(err) => {
                self.names.remove(&config.name);
                return Err(err);
            }
        };
        if let Err(err) = self.watch.register(client.clone(), &config) {
            self.names.remove(&config.name);
            return Err(err);
        }
        self.health.register(client.clone());

        info!(
            root_id = %root_id,
            root = %config.name,
            protocol = %config.protocol,
            "root registered"
        );
        self.roots
            .insert(root_id, RegisteredRoot { config, client });
        Ok(root_id)
    }

    /// Tear one root out of every service and release its backend
    /// resources. Cached snapshots, breaker state, and checkpoints for the
    /// root are dropped with it.
    pub async fn deregister_root(&self, root_id: RootId) -> Result<()> {
        let Some((_, registered)) = self.roots.remove(&root_id) else {
            return Err(FsError::NotFound(format!("root {root_id}")));
        };
        self.names.remove(&registered.config.name);
        self.watch.unregister(root_id);
        self.health.unregister(root_id);

        if let Err(err) = registered.client.disconnect().await {
            warn!(
                root_id = %root_id,
                error = %err,
                "disconnect failed during deregistration"
            );
        }
        self.factory.breakers().remove(root_id);
        self.factory.cache().forget_root(root_id).await;
        if let Err(err) = self.checkpoints.clear(root_id).await {
            warn!(
                root_id = %root_id,
                error = %err,
                "checkpoint clear failed during deregistration"
            );
        }

        info!(root_id = %root_id, root = %registered.config.name, "root deregistered");
        Ok(())
    }

    pub fn client(
        &self,
        root_id: RootId,
    ) -> Result<Arc<dyn StorageClient>> {
        self.roots
            .get(&root_id)
            .map(|entry| entry.client.clone())
            .ok_or_else(|| FsError::NotFound(format!("root {root_id}")))
    }

    pub fn client_by_name(
        &self,
        name: &str,
    ) -> Result<Arc<dyn StorageClient>> {
        let root_id = self
            .names
            .get(name)
            .map(|entry| *entry.value())
            .ok_or_else(|| FsError::NotFound(format!("root {name:?}")))?;
        self.client(root_id)
    }

    pub fn root_ids(&self) -> Vec<RootId> {
        self.roots.iter().map(|entry| *entry.key()).collect()
    }

    pub fn root_config(
        &self,
        root_id: RootId,
    ) -> Result<StorageRootConfig> {
        self.roots
            .get(&root_id)
            .map(|entry| entry.config.clone())
            .ok_or_else(|| FsError::NotFound(format!("root {root_id}")))
    }

    /// Walk a registered root. `options` defaults to the ones derived from
    /// the root's configuration; pass [`ScanOptions::resumed`] output to
    /// pick up an interrupted scan.
    pub async fn start_scan(
        &self,
        root_id: RootId,
        options: Option<ScanOptions>,
    ) -> Result<ScanHandle> {
        let registered = self
            .roots
            .get(&root_id)
            .ok_or_else(|| FsError::NotFound(format!("root {root_id}")))?;
        let client = registered.client.clone();
        let options = options
            .unwrap_or_else(|| ScanOptions::from_root(&registered.config));
        drop(registered);

        let ctx = OpContext::new(self.shutdown.child_token(), None);
        self.scanner.scan(client, options, &ctx).await
    }

    /// Debounced change events across every watched root.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.watch.subscribe()
    }

    /// Health probe outcomes as the monitor produces them.
    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthReport> {
        self.health.subscribe()
    }

    /// On-demand probe of a registered root.
    pub async fn check_health(
        &self,
        root_id: RootId,
    ) -> Result<HealthReport> {
        self.health.check_now(root_id).await
    }

    /// Probe a candidate configuration without registering it. Validation
    /// failures surface as errors; reachability failures come back as an
    /// offline report.
    pub async fn test_connection(
        &self,
        config: &StorageRootConfig,
    ) -> Result<HealthReport> {
        let root_id = config.id.map(RootId).unwrap_or_else(RootId::new);
        self.factory
            .test_connection(root_id, config, &self.config.health)
            .await
    }

    pub fn cache_stats(&self) -> SnapshotStats {
        self.factory.cache().snapshot_stats()
    }

    /// Stop scans, watches, and probes, then disconnect every client.
    pub async fn shutdown(&self) {
        info!("storage manager shutting down");
        self.shutdown.cancel();
        self.watch.shutdown();
        self.health.shutdown();

        let clients: Vec<(RootId, Arc<dyn StorageClient>)> = self
            .roots
            .iter()
            .map(|entry| (*entry.key(), entry.client.clone()))
            .collect();
        for (root_id, client) in clients {
            if let Err(err) = client.disconnect().await {
                warn!(
                    root_id = %root_id,
                    error = %err,
                    "disconnect failed at shutdown"
                );
            }
        }
        self.roots.clear();
        self.names.clear();
    }
}
