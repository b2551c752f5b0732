//! Listing-diff change detection for roots without native notifications.
//!
//! Network backends cannot push events, so the poller walks the tree every
//! interval, fingerprints each entry, and diffs against the previous sweep.
//! The first sweep only primes the snapshot; registration must not replay
//! the whole tree as creations. A failed sweep keeps the old snapshot, so
//! an outage does not read as a mass deletion. Renames surface as a
//! remove/create pair since listings carry no identity across paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fathom_model::{ChangeKind, FileKind, FileRecord, RootId};

use crate::client::StorageClient;
use crate::context::OpContext;
use crate::error::Result;

use super::debounce::Debouncer;

#[derive(Debug, Clone, PartialEq)]
struct Fingerprint {
    kind: FileKind,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// Directories are fingerprinted by kind alone; their size and mtime churn
/// with every child change and would double-report.
fn fingerprint(record: &FileRecord) -> Fingerprint {
    let dir = record.is_dir();
    Fingerprint {
        kind: record.kind,
        size: if dir { 0 } else { record.size },
        modified: if dir { None } else { record.modified },
    }
}

pub(super) struct PollWatch {
    root_id: RootId,
    client: Arc<dyn StorageClient>,
    interval: Duration,
    depth_limit: Option<u32>,
    snapshot: HashMap<String, Fingerprint>,
    primed: bool,
}

impl PollWatch {
    pub(super) fn new(
        client: Arc<dyn StorageClient>,
        interval: Duration,
        depth_limit: Option<u32>,
    ) -> Self {
        PollWatch {
            root_id: client.root_id(),
            client,
            interval,
            depth_limit,
            snapshot: HashMap::new(),
            primed: false,
        }
    }

    pub(super) async fn run(
        mut self,
        debouncer: Arc<Debouncer>,
        shutdown: CancellationToken,
    ) {
        debug!(
            root_id = %self.root_id,
            interval = ?self.interval,
            "poll watch started"
        );
        loop {
            if let Err(err) = self.sweep(&shutdown, &debouncer).await {
                if shutdown.is_cancelled() {
                    break;
                }
                warn!(
                    root_id = %self.root_id,
                    error = %err,
                    "poll sweep failed, keeping previous snapshot"
                );
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!(root_id = %self.root_id, "poll watch stopped");
    }

    /// One full walk and diff. Any listing error aborts the sweep with the
    /// snapshot untouched.
    async fn sweep(
        &mut self,
        shutdown: &CancellationToken,
        debouncer: &Debouncer,
    ) -> Result<()> {
        // A sweep slower than the cadence is cut off rather than allowed
        // to overlap the next one.
        let ctx = OpContext::new(
            shutdown.child_token(),
            Some(Instant::now() + self.interval),
        );

        let mut walked: HashMap<String, Fingerprint> = HashMap::new();
        let mut frontier: Vec<(String, u32)> = vec![(String::new(), 0)];
        while let Some((dir, depth)) = frontier.pop() {
            let listing = self.client.list(&ctx, &dir).await?;
            for record in listing.into_value() {
                if record.is_dir() {
                    let child_depth = depth + 1;
                    if self
                        .depth_limit
                        .is_none_or(|limit| child_depth <= limit)
                    {
                        frontier.push((record.path.clone(), child_depth));
                    }
                }
                walked.insert(record.path.clone(), fingerprint(&record));
            }
        }

        let mut changes: Vec<(String, ChangeKind)> = Vec::new();
        for (path, current) in &walked {
            match self.snapshot.get(path) {
                None => changes.push((path.clone(), ChangeKind::Created)),
                Some(previous) if previous != current => {
                    changes.push((path.clone(), ChangeKind::Modified));
                }
                Some(_) => {}
            }
        }
        for path in self.snapshot.keys() {
            if !walked.contains_key(path) {
                changes.push((path.clone(), ChangeKind::Removed));
            }
        }

        let first = !self.primed;
        self.primed = true;
        self.snapshot = walked;
        if first {
            debug!(
                root_id = %self.root_id,
                entries = self.snapshot.len(),
                "poll snapshot primed"
            );
            return Ok(());
        }

        for (path, kind) in changes {
            debouncer.observe(self.root_id, path, kind);
        }
        Ok(())
    }
}
