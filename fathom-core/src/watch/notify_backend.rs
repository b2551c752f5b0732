//! Native change notifications for local roots.
//!
//! A [`notify`] watcher pushes raw events from its own thread into an
//! unbounded channel; the pump task classifies them, strips the base
//! directory, and feeds the debouncer. The watcher handle lives inside the
//! pump so watching stops when the task does.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fathom_model::{ChangeKind, RootId};

use crate::error::{FsError, Result};

use super::debounce::Debouncer;

type RawEvent = std::result::Result<Event, notify::Error>;

pub(super) struct LocalWatch {
    root_id: RootId,
    base: PathBuf,
    raw: mpsc::UnboundedReceiver<RawEvent>,
    // Held only so the OS watch stays registered for the pump's lifetime.
    _watcher: RecommendedWatcher,
}

impl LocalWatch {
    /// Register the recursive OS watch. Fails when the base directory does
    /// not exist or the platform watcher cannot be created.
    pub(super) fn start(
        root_id: RootId,
        base: impl Into<PathBuf>,
    ) -> Result<Self> {
        let base = base.into();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |raw: RawEvent| {
                let _ = raw_tx.send(raw);
            },
            Config::default(),
        )
        .map_err(|err| {
            FsError::Internal(format!("change watcher init: {err}"))
        })?;
        watcher
            .watch(&base, RecursiveMode::Recursive)
            .map_err(|err| {
                FsError::Internal(format!(
                    "watch {}: {err}",
                    base.display()
                ))
            })?;
        debug!(root_id = %root_id, base = %base.display(), "native watch started");
        Ok(LocalWatch {
            root_id,
            base,
            raw: raw_rx,
            _watcher: watcher,
        })
    }

    pub(super) async fn run(
        mut self,
        debouncer: Arc<Debouncer>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.raw.recv() => match received {
                    Some(Ok(event)) => {
                        let Some(kind) = classify(&event.kind) else {
                            continue;
                        };
                        for path in &event.paths {
                            if let Some(rel) = relativize(&self.base, path)
                            {
                                debouncer.observe(self.root_id, rel, kind);
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!(
                            root_id = %self.root_id,
                            error = %err,
                            "native watch error"
                        );
                    }
                    None => break,
                },
            }
        }
        debug!(root_id = %self.root_id, "native watch stopped");
    }
}

/// Map a raw notification onto the catalog's change kinds. Access and
/// catch-all events are noise and dropped.
fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Root-relative `/`-separated path, `None` for the base itself or paths
/// outside it.
fn relativize(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
