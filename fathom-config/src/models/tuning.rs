//! Runtime tuning knobs for the resilience stack, scanner, watcher, and
//! health monitor. Durations are stored as `*_ms` integers so they read
//! naturally in TOML/JSON; accessor methods convert to [`Duration`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff policy for retried operations against a storage root.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per guarded operation, first try included. `1` disables
    /// retries entirely.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after that.
    pub backoff_base_ms: u64,
    /// Ceiling for any single computed delay.
    pub backoff_max_ms: u64,
    /// Ceiling for the sum of all delays in one guarded call. Attempts stop
    /// once the next sleep would cross it, even with attempts remaining.
    pub max_total_delay_ms: u64,
    /// Fraction of each delay added as random jitter, `0.10` = up to +10%.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            max_total_delay_ms: 60_000,
            jitter_ratio: 0.10,
        }
    }
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn max_total_delay(&self) -> Duration {
        Duration::from_millis(self.max_total_delay_ms)
    }
}

/// Circuit breaker thresholds, per storage root.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Transient failures inside the sliding window before the breaker
    /// opens.
    pub failure_threshold: u32,
    /// Width of the sliding failure window.
    pub window_ms: u64,
    /// How long an open breaker rejects calls before allowing one probe.
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 60_000,
            cooldown_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Offline snapshot cache sizing and freshness.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Age at which a snapshot stops counting as fresh. Purely
    /// observational; serving is governed by the grace window.
    pub ttl_ms: u64,
    /// Maximum snapshot age the cache will serve when the live backend
    /// fails. Older entries are evicted.
    pub staleness_grace_ms: u64,
    /// Entry cap; the oldest snapshot is evicted first when exceeded.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            staleness_grace_ms: 3_600_000,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn staleness_grace(&self) -> Duration {
        Duration::from_millis(self.staleness_grace_ms)
    }
}

/// Umbrella for the per-root resilience stack.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
}

/// Directory scanner tuning.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Worker tasks walking directories in parallel. Raise to scan faster,
    /// but remote backends and spinning disks fall over quickly past the
    /// low single digits.
    pub max_concurrent_scans: usize,
    /// Budget for hashing one file's content, separate from listing
    /// deadlines. On expiry the record ships without a hash.
    pub hash_timeout_ms: u64,
    /// Completed directories between checkpoint writes.
    pub checkpoint_interval: u64,
    /// Capacity of the record channel handed to the consumer.
    pub record_buffer: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: 4,
            hash_timeout_ms: 10_000,
            checkpoint_interval: 64,
            record_buffer: 512,
        }
    }
}

impl ScannerConfig {
    pub fn hash_timeout(&self) -> Duration {
        Duration::from_millis(self.hash_timeout_ms)
    }
}

/// Change watcher tuning.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet time a path must hold before its burst of raw events collapses
    /// into one change notification.
    pub debounce_window_ms: u64,
    /// Polling cadence for roots whose backend cannot push notifications
    /// (FTP, WebDAV).
    #[serde(default = "WatchConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Broadcast capacity for emitted change events; the slowest subscriber
    /// starts losing the oldest events past this.
    pub event_buffer: usize,
}

impl WatchConfig {
    fn default_poll_interval_ms() -> u64 {
        30_000
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 500,
            poll_interval_ms: Self::default_poll_interval_ms(),
            event_buffer: 1_024,
        }
    }
}

/// Connection health monitor cadence.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub check_interval_ms: u64,
    /// Per-probe deadline.
    pub check_timeout_ms: u64,
    /// Consecutive failed probes before a root is marked offline; a single
    /// failure only degrades it.
    pub offline_after: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 30_000,
            check_timeout_ms: 10_000,
            offline_after: 3,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}
