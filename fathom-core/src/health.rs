//! Periodic connection health probes for registered roots.
//!
//! Every interval the monitor probes each registered client under the
//! configured per-probe deadline. One failed probe only degrades a root;
//! it goes offline after `offline_after` consecutive failures, and a single
//! success snaps it back to connected. State transitions are logged and
//! every probe outcome is broadcast to subscribers.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fathom_config::HealthConfig;
use fathom_model::{ConnectionState, HealthReport, RootId};

use crate::client::StorageClient;
use crate::context::OpContext;
use crate::error::{FsError, Result};

const REPORT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy)]
struct RootHealth {
    state: ConnectionState,
    consecutive_failures: u32,
}

#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    targets: DashMap<RootId, Arc<dyn StorageClient>>,
    states: DashMap<RootId, RootHealth>,
    reports: broadcast::Sender<HealthReport>,
    shutdown: CancellationToken,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        let (reports, _) = broadcast::channel(REPORT_BUFFER);
        HealthMonitor {
            config,
            targets: DashMap::new(),
            states: DashMap::new(),
            reports,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn register(&self, client: Arc<dyn StorageClient>) {
        let root_id = client.root_id();
        self.targets.insert(root_id, client);
        debug!(root_id = %root_id, "health monitoring registered");
    }

    pub fn unregister(&self, root_id: RootId) {
        self.targets.remove(&root_id);
        self.states.remove(&root_id);
    }

    /// Probe outcomes as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthReport> {
        self.reports.subscribe()
    }

    /// Last known state, `None` before the first probe.
    pub fn state_of(&self, root_id: RootId) -> Option<ConnectionState> {
        self.states.get(&root_id).map(|entry| entry.state)
    }

    pub fn states(&self) -> Vec<(RootId, ConnectionState)> {
        self.states
            .iter()
            .map(|entry| (*entry.key(), entry.state))
            .collect()
    }

    /// Probe one root immediately, outside the periodic cadence.
    pub async fn check_now(&self, root_id: RootId) -> Result<HealthReport> {
        let client = self
            .targets
            .get(&root_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FsError::NotFound(format!("root {root_id}")))?;
        let report = self.probe_root(root_id, &client).await;
        let _ = self.reports.send(report.clone());
        Ok(report)
    }

    /// Periodic probe loop; runs until [`shutdown`](Self::shutdown).
    pub async fn run(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.sweep().await;
        }
        debug!("health monitor stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn sweep(&self) {
        let targets: Vec<(RootId, Arc<dyn StorageClient>)> = self
            .targets
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let probes = targets.into_iter().map(|(root_id, client)| async move {
            let report = self.probe_root(root_id, &client).await;
            let _ = self.reports.send(report);
        });
        futures::future::join_all(probes).await;
    }

    async fn probe_root(
        &self,
        root_id: RootId,
        client: &Arc<dyn StorageClient>,
    ) -> HealthReport {
        let ctx = OpContext::with_timeout(self.config.check_timeout());
        let started = Instant::now();
        let outcome = client.probe(&ctx).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut entry = self.states.entry(root_id).or_insert(RootHealth {
            state: ConnectionState::Connected,
            consecutive_failures: 0,
        });
        let previous = entry.state;
        let (state, error) = match outcome {
            Ok(()) => {
                entry.consecutive_failures = 0;
                (ConnectionState::Connected, None)
            }
            Err(err) => {
                entry.consecutive_failures =
                    entry.consecutive_failures.saturating_add(1);
                let state = if entry.consecutive_failures
                    >= self.config.offline_after.max(1)
                {
                    ConnectionState::Offline
                } else {
                    ConnectionState::Degraded
                };
                (state, Some(err.to_string()))
            }
        };
        entry.state = state;
        drop(entry);

        if previous != state {
            match state {
                ConnectionState::Connected => {
                    info!(root_id = %root_id, "root recovered");
                }
                ConnectionState::Degraded => {
                    warn!(root_id = %root_id, error = ?error, "root degraded");
                }
                ConnectionState::Offline => {
                    warn!(root_id = %root_id, error = ?error, "root offline");
                }
            }
        }

        HealthReport {
            root_id,
            protocol: client.protocol(),
            state,
            latency_ms: (state == ConnectionState::Connected)
                .then_some(latency_ms),
            checked_at: Utc::now(),
            error,
        }
    }
}
