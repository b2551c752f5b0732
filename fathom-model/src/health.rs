use chrono::{DateTime, Utc};

use crate::ids::RootId;
use crate::protocol::Protocol;

/// Liveness of a storage root as seen by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ConnectionState {
    /// Last probe succeeded.
    Connected,
    /// Most recent probe failed but the root was reachable recently.
    Degraded,
    /// Probes have failed repeatedly; the root is treated as down.
    Offline,
}

impl ConnectionState {
    pub fn is_usable(&self) -> bool {
        !matches!(self, ConnectionState::Offline)
    }
}

/// Outcome of one connection probe against a storage root.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HealthReport {
    pub root_id: RootId,
    pub protocol: Protocol,
    pub state: ConnectionState,
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
