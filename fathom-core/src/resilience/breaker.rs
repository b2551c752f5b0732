//! Per-root circuit breaker.
//!
//! Counts transient failures in a sliding window and, once the threshold is
//! crossed, rejects calls outright until a cooldown passes. After the
//! cooldown exactly one probe is let through; its outcome decides between
//! closing again and another full cooldown. Keeping the gate per root means
//! a dead NAS cannot slow down scans of the healthy ones.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use fathom_config::BreakerConfig;
use fathom_model::RootId;

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Advisory wait handed out while a half-open probe is already in flight.
const PROBE_RETRY_HINT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Preflight verdict for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allow,
    /// The call doubles as the half-open probe; report its outcome.
    AllowProbe,
    Deny { retry_after: Duration },
}

#[derive(Debug)]
struct Inner {
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    root_id: RootId,
    config: BreakerConfig,
    /// Mirrors the coarse state so closed-path preflights skip the lock.
    state: AtomicU8,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(root_id: RootId, config: BreakerConfig) -> Self {
        CircuitBreaker {
            root_id,
            config,
            state: AtomicU8::new(CLOSED),
            inner: Mutex::new(Inner {
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Decide whether a call may go to the backend right now.
    pub async fn preflight(&self) -> Gate {
        if self.state.load(Ordering::Acquire) == CLOSED {
            return Gate::Allow;
        }

        let mut inner = self.inner.lock().await;
        match self.state.load(Ordering::Acquire) {
            // A success closed the breaker while we waited for the lock.
            CLOSED => Gate::Allow,
            OPEN => {
                let opened_at =
                    inner.opened_at.unwrap_or_else(Instant::now);
                let cooldown = self.config.cooldown();
                let elapsed = opened_at.elapsed();
                if elapsed >= cooldown {
                    self.state.store(HALF_OPEN, Ordering::Release);
                    inner.probe_in_flight = true;
                    info!(
                        root_id = %self.root_id,
                        "cooldown over, letting one probe through"
                    );
                    Gate::AllowProbe
                } else {
                    Gate::Deny {
                        retry_after: cooldown - elapsed,
                    }
                }
            }
            _ => {
                if inner.probe_in_flight {
                    Gate::Deny {
                        retry_after: PROBE_RETRY_HINT,
                    }
                } else {
                    inner.probe_in_flight = true;
                    Gate::AllowProbe
                }
            }
        }
    }

    /// Successful backend contact. Closes the breaker and clears the
    /// failure window regardless of previous state.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        let previous = self.state.swap(CLOSED, Ordering::AcqRel);
        inner.failures.clear();
        inner.opened_at = None;
        inner.probe_in_flight = false;
        if previous != CLOSED {
            info!(root_id = %self.root_id, "breaker closed");
        }
    }

    /// Transient backend failure.
    pub async fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        match self.state.load(Ordering::Acquire) {
            HALF_OPEN => {
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                inner.failures.clear();
                self.state.store(OPEN, Ordering::Release);
                warn!(
                    root_id = %self.root_id,
                    "probe failed, breaker reopened"
                );
            }
            // Already open; stragglers from in-flight calls change nothing.
            OPEN => {}
            _ => {
                inner.failures.push_back(now);
                let window = self.config.window();
                while let Some(oldest) = inner.failures.front() {
                    if now.duration_since(*oldest) > window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len()
                    >= self.config.failure_threshold.max(1) as usize
                {
                    inner.opened_at = Some(now);
                    inner.probe_in_flight = false;
                    self.state.store(OPEN, Ordering::Release);
                    warn!(
                        root_id = %self.root_id,
                        failures = inner.failures.len(),
                        window_ms = self.config.window_ms,
                        "failure threshold crossed, breaker open"
                    );
                }
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("CircuitBreaker");
        out.field("root_id", &self.root_id)
            .field("state", &self.state());
        match self.inner.try_lock() {
            Ok(inner) => out.field("failures", &inner.failures.len()),
            Err(_) => out.field("failures", &"**<locked>**"),
        };
        out.finish()
    }
}

/// Shared map of breakers, one per storage root.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<RootId, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        BreakerRegistry {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn for_root(&self, root_id: RootId) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(root_id)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(root_id, self.config.clone()))
            })
            .clone()
    }

    pub fn get(&self, root_id: RootId) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(&root_id)
            .map(|entry| entry.value().clone())
    }

    pub fn remove(&self, root_id: RootId) {
        self.breakers.remove(&root_id);
    }
}
