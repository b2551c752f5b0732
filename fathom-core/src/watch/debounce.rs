//! Burst collapsing for raw change notifications.
//!
//! Editors, downloaders, and copy tools touch a path many times in quick
//! succession. The debouncer tracks a generation counter per path and arms a
//! timer on every raw observation; only the timer that still matches the
//! latest generation when it fires emits an event, so a burst that settles
//! inside one quiet window becomes a single [`ChangeEvent`] carrying the
//! final generation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use fathom_model::{ChangeEvent, ChangeKind, RootId};

type States = HashMap<(RootId, String), PathState>;

#[derive(Debug)]
struct PendingEmit {
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct PathState {
    /// Raw observations of this path since the watcher started. Never
    /// resets, so consumers can order events per path.
    generation: u64,
    kind: Option<ChangeKind>,
    pending: Option<PendingEmit>,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    window: Duration,
    events: broadcast::Sender<ChangeEvent>,
    states: Mutex<States>,
}

impl Debouncer {
    pub fn new(
        window: Duration,
        events: broadcast::Sender<ChangeEvent>,
    ) -> Self {
        Debouncer {
            inner: Arc::new(Inner {
                window,
                events,
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Feed one raw observation. The emitted kind for a window follows
    /// [`merge_kinds`]; the generation is the count at the moment the
    /// window settles.
    pub fn observe(
        &self,
        root_id: RootId,
        path: impl Into<String>,
        kind: ChangeKind,
    ) {
        let path = path.into();
        let superseded = {
            let mut states = lock(&self.inner.states);
            let state =
                states.entry((root_id, path.clone())).or_default();
            state.generation += 1;
            state.kind = Some(match state.kind {
                Some(previous) if state.pending.is_some() => {
                    merge_kinds(previous, kind)
                }
                _ => kind,
            });
            let timer = tokio::spawn(emit_after(
                self.inner.clone(),
                root_id,
                path,
                state.generation,
            ));
            state.pending.replace(PendingEmit {
                generation: state.generation,
                timer,
            })
        };
        // The stale timer would lose the generation check anyway; aborting
        // it outside the lock just reclaims the task sooner.
        if let Some(previous) = superseded {
            previous.timer.abort();
        }
    }

    /// Drop all state and pending timers for one root.
    pub fn forget_root(&self, root_id: RootId) {
        let mut dropped = Vec::new();
        {
            let mut states = lock(&self.inner.states);
            states.retain(|key, state| {
                if key.0 == root_id {
                    if let Some(pending) = state.pending.take() {
                        dropped.push(pending);
                    }
                    false
                } else {
                    true
                }
            });
        }
        for pending in dropped {
            pending.timer.abort();
        }
    }

    /// Drop everything; used at service shutdown.
    pub fn clear(&self) {
        let mut dropped = Vec::new();
        {
            let mut states = lock(&self.inner.states);
            for (_, state) in states.drain() {
                if let Some(pending) = state.pending {
                    dropped.push(pending);
                }
            }
        }
        for pending in dropped {
            pending.timer.abort();
        }
    }

    /// Paths currently tracked, settled ones included.
    pub fn tracked_paths(&self) -> usize {
        lock(&self.inner.states).len()
    }
}

async fn emit_after(
    inner: Arc<Inner>,
    root_id: RootId,
    path: String,
    generation: u64,
) {
    tokio::time::sleep(inner.window).await;
    let kind = {
        let mut states = lock(&inner.states);
        let Some(state) = states.get_mut(&(root_id, path.clone())) else {
            return;
        };
        // A newer observation rearmed the window; that timer owns the emit.
        if state.generation != generation {
            return;
        }
        state.pending = None;
        state.kind
    };
    let Some(kind) = kind else {
        return;
    };
    let event = ChangeEvent {
        root_id,
        path,
        kind,
        generation,
        observed_at: Utc::now(),
    };
    debug!(
        root_id = %event.root_id,
        path = %event.path,
        kind = ?event.kind,
        generation = event.generation,
        "change settled"
    );
    let _ = inner.events.send(event);
}

/// Collapse two raw kinds observed inside one window. A create followed by
/// writes is still a create; a removal erases whatever preceded it; a
/// remove-then-create pair is an in-place replacement.
fn merge_kinds(previous: ChangeKind, next: ChangeKind) -> ChangeKind {
    match (previous, next) {
        (_, ChangeKind::Removed) => ChangeKind::Removed,
        (ChangeKind::Created, ChangeKind::Modified) => ChangeKind::Created,
        (ChangeKind::Removed, ChangeKind::Created) => ChangeKind::Modified,
        (_, next) => next,
    }
}

fn lock(states: &Mutex<States>) -> MutexGuard<'_, States> {
    states.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer(
        window_ms: u64,
    ) -> (Debouncer, broadcast::Receiver<ChangeEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (Debouncer::new(Duration::from_millis(window_ms), tx), rx)
    }

    async fn next(
        rx: &mut broadcast::Receiver<ChangeEvent>,
    ) -> ChangeEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within deadline")
            .expect("channel open")
    }

    #[tokio::test]
    async fn burst_settles_into_one_event() {
        let (debouncer, mut rx) = debouncer(40);
        let root = RootId::new();
        for _ in 0..5 {
            debouncer.observe(root, "a/file.mkv", ChangeKind::Modified);
        }

        let event = next(&mut rx).await;
        assert_eq!(event.path, "a/file.mkv");
        assert_eq!(event.generation, 5);
        assert_eq!(event.kind, ChangeKind::Modified);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn create_followed_by_writes_stays_a_create() {
        let (debouncer, mut rx) = debouncer(40);
        let root = RootId::new();
        debouncer.observe(root, "new.mkv", ChangeKind::Created);
        debouncer.observe(root, "new.mkv", ChangeKind::Modified);
        debouncer.observe(root, "new.mkv", ChangeKind::Modified);

        let event = next(&mut rx).await;
        assert_eq!(event.kind, ChangeKind::Created);
        assert_eq!(event.generation, 3);
    }

    #[tokio::test]
    async fn removal_erases_earlier_observations() {
        let (debouncer, mut rx) = debouncer(40);
        let root = RootId::new();
        debouncer.observe(root, "gone.mkv", ChangeKind::Modified);
        debouncer.observe(root, "gone.mkv", ChangeKind::Removed);

        assert_eq!(next(&mut rx).await.kind, ChangeKind::Removed);
    }

    #[tokio::test]
    async fn generations_stay_monotonic_across_windows() {
        let (debouncer, mut rx) = debouncer(20);
        let root = RootId::new();

        debouncer.observe(root, "slow.mkv", ChangeKind::Created);
        assert_eq!(next(&mut rx).await.generation, 1);

        debouncer.observe(root, "slow.mkv", ChangeKind::Modified);
        let second = next(&mut rx).await;
        assert_eq!(second.generation, 2);
        assert_eq!(second.kind, ChangeKind::Modified);
    }

    #[tokio::test]
    async fn paths_do_not_share_windows() {
        let (debouncer, mut rx) = debouncer(30);
        let root = RootId::new();
        debouncer.observe(root, "a.mkv", ChangeKind::Created);
        debouncer.observe(root, "b.mkv", ChangeKind::Created);
        debouncer.observe(root, "b.mkv", ChangeKind::Modified);

        let mut seen = HashMap::new();
        for _ in 0..2 {
            let event = next(&mut rx).await;
            seen.insert(event.path.clone(), event.generation);
        }
        assert_eq!(seen.get("a.mkv"), Some(&1));
        assert_eq!(seen.get("b.mkv"), Some(&2));
    }

    #[tokio::test]
    async fn forget_root_drops_pending_windows() {
        let (debouncer, mut rx) = debouncer(30);
        let root = RootId::new();
        debouncer.observe(root, "doomed.mkv", ChangeKind::Created);
        debouncer.forget_root(root);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(debouncer.tracked_paths(), 0);
    }
}
