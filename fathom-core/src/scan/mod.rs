//! Bounded-concurrency directory walker.
//!
//! A scan runs a fixed pool of worker tasks over a shared frontier of
//! pending directories. An outstanding-directory counter detects the moment
//! the walk is drained; records stream to the consumer over a bounded
//! channel, so a slow consumer applies backpressure instead of ballooning
//! memory. Progress is checkpointed through the [`CheckpointStore`] port so
//! an interrupted scan of a large tree can pick up where it stopped.

pub mod filter;
pub mod hash;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fathom_config::{ScannerConfig, StorageRootConfig};
use fathom_model::{FileRecord, ScanError, ScanId, ScanReport};

use crate::client::StorageClient;
use crate::context::OpContext;
use crate::error::{FsError, Result};
use crate::store::{CheckpointStore, ScanCheckpoint};

pub use filter::PathFilter;

/// Per-scan knobs, usually derived from the root's configuration.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Directory depth limit, root = 0. `None` walks the whole tree.
    pub max_depth: Option<u32>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Hash file contents for duplicate detection.
    pub hash_contents: bool,
    /// Skip directories recorded by a previous interrupted scan.
    pub resume: bool,
}

impl ScanOptions {
    pub fn from_root(config: &StorageRootConfig) -> Self {
        ScanOptions {
            max_depth: config.depth_limit(),
            include_patterns: config.include_patterns.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
            hash_contents: config.enable_duplicate_detection,
            resume: false,
        }
    }

    pub fn resumed(mut self) -> Self {
        self.resume = true;
        self
    }
}

/// Live handle to a running scan: the record stream, a cancel switch, and
/// the final report.
#[derive(Debug)]
pub struct ScanHandle {
    scan_id: ScanId,
    records: mpsc::Receiver<FileRecord>,
    cancel: CancellationToken,
    join: JoinHandle<Result<ScanReport>>,
}

impl ScanHandle {
    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next record, `None` once the scan has drained.
    pub async fn recv(&mut self) -> Option<FileRecord> {
        self.records.recv().await
    }

    /// Drain every record, then return the report. Convenient for tests and
    /// small trees; large scans should consume [`recv`](Self::recv)
    /// incrementally.
    pub async fn collect(mut self) -> (Vec<FileRecord>, Result<ScanReport>) {
        let mut records = Vec::new();
        while let Some(record) = self.records.recv().await {
            records.push(record);
        }
        (records, flatten_join(self.join.await))
    }

    /// Wait for the report, draining any records the consumer left behind
    /// so workers never wedge on a full channel.
    pub async fn join(mut self) -> Result<ScanReport> {
        loop {
            tokio::select! {
                received = self.records.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
                finished = &mut self.join => {
                    return flatten_join(finished);
                }
            }
        }
        flatten_join(self.join.await)
    }
}

fn flatten_join(
    joined: std::result::Result<Result<ScanReport>, tokio::task::JoinError>,
) -> Result<ScanReport> {
    match joined {
        Ok(result) => result,
        Err(err) => {
            Err(FsError::Internal(format!("scan task panicked: {err}")))
        }
    }
}

/// Fold a finished report into a single pass/fail answer.
pub fn require_complete(report: &ScanReport) -> Result<()> {
    if !report.completed {
        return Err(FsError::Cancelled(
            "scan stopped before completion".to_string(),
        ));
    }
    if !report.errors.is_empty() {
        return Err(FsError::ScanPartial {
            failed: report.errors.len(),
        });
    }
    Ok(())
}

#[derive(Debug)]
pub struct Scanner {
    config: ScannerConfig,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl Scanner {
    pub fn new(
        config: ScannerConfig,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Scanner {
            config,
            checkpoints,
        }
    }

    /// Start walking the root behind `client`. The returned handle streams
    /// records as workers produce them.
    pub async fn scan(
        &self,
        client: Arc<dyn StorageClient>,
        options: ScanOptions,
        parent: &OpContext,
    ) -> Result<ScanHandle> {
        let root_id = client.root_id();
        let filter = PathFilter::new(
            &options.include_patterns,
            &options.exclude_patterns,
        )?;
        let scan_id = ScanId::new();

        let checkpoint = if options.resume {
            match self.checkpoints.load(root_id).await {
                Ok(found) => found.filter(|cp| !cp.is_empty()),
                Err(err) => {
                    warn!(
                        root_id = %root_id,
                        error = %err,
                        "checkpoint load failed, scanning from scratch"
                    );
                    None
                }
            }
        } else {
            None
        };

        let ctx = OpContext::new(
            parent.cancel_token().child_token(),
            parent.deadline(),
        );
        let cancel = ctx.cancel_token().clone();
        let (records_tx, records_rx) =
            mpsc::channel(self.config.record_buffer.max(1));
        let (frontier_tx, frontier_rx) = mpsc::unbounded_channel();

        let mut progress = Progress {
            report: ScanReport::begin(scan_id, root_id),
            completed: HashSet::new(),
            pending: HashMap::new(),
            since_checkpoint: 0,
            fatal: None,
        };

        let resumed = checkpoint.is_some();
        let seeds: Vec<DirJob> = match &checkpoint {
            Some(found) => {
                progress.report.resumed = true;
                progress.completed = found.completed.iter().cloned().collect();
                found
                    .pending
                    .iter()
                    .map(|(path, depth)| DirJob {
                        path: path.clone(),
                        depth: *depth,
                    })
                    .collect()
            }
            None => vec![DirJob {
                path: String::new(),
                depth: 0,
            }],
        };
        for job in &seeds {
            progress.pending.insert(job.path.clone(), job.depth);
        }

        let shared = Arc::new(ScanShared {
            client,
            ctx,
            filter,
            max_depth: options.max_depth,
            hash_contents: options.hash_contents,
            hash_timeout: self.config.hash_timeout(),
            checkpoint_interval: self.config.checkpoint_interval.max(1),
            checkpoints: self.checkpoints.clone(),
            records: records_tx,
            frontier: frontier_tx,
            queue: Mutex::new(frontier_rx),
            outstanding: AtomicUsize::new(0),
            done: CancellationToken::new(),
            aborted: AtomicBool::new(false),
            progress: Mutex::new(progress),
        });

        if seeds.is_empty() {
            // Resumed checkpoint with nothing pending: already finished.
            shared.done.cancel();
        }
        for job in seeds {
            enqueue(&shared, job);
        }

        let worker_count = self.config.max_concurrent_scans.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            workers.push(tokio::spawn(worker_loop(shared.clone(), index)));
        }

        info!(
            root_id = %root_id,
            scan_id = %scan_id,
            workers = worker_count,
            resumed,
            "scan started"
        );

        let join = tokio::spawn(finalize(shared, workers));
        Ok(ScanHandle {
            scan_id,
            records: records_rx,
            cancel,
            join,
        })
    }
}

struct DirJob {
    path: String,
    depth: u32,
}

struct Progress {
    report: ScanReport,
    /// Directories fully listed, for checkpointing and resume skips.
    completed: HashSet<String>,
    /// Discovered but not yet listed.
    pending: HashMap<String, u32>,
    since_checkpoint: u64,
    /// Root listing failure; aborts the scan.
    fatal: Option<FsError>,
}

struct ScanShared {
    client: Arc<dyn StorageClient>,
    ctx: OpContext,
    filter: PathFilter,
    max_depth: Option<u32>,
    hash_contents: bool,
    hash_timeout: Duration,
    checkpoint_interval: u64,
    checkpoints: Arc<dyn CheckpointStore>,
    records: mpsc::Sender<FileRecord>,
    frontier: mpsc::UnboundedSender<DirJob>,
    queue: Mutex<mpsc::UnboundedReceiver<DirJob>>,
    outstanding: AtomicUsize,
    done: CancellationToken,
    /// Set when the record channel closes under us; the drain that follows
    /// must not count as a clean finish.
    aborted: AtomicBool,
    progress: Mutex<Progress>,
}

fn enqueue(shared: &Arc<ScanShared>, job: DirJob) {
    shared.outstanding.fetch_add(1, Ordering::SeqCst);
    if shared.frontier.send(job).is_err() {
        finish_one(shared);
    }
}

fn finish_one(shared: &ScanShared) {
    if shared.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.done.cancel();
    }
}

async fn worker_loop(shared: Arc<ScanShared>, index: usize) {
    loop {
        if shared.ctx.check("scan worker").is_err() {
            return;
        }
        let job = {
            let mut queue = shared.queue.lock().await;
            tokio::select! {
                _ = shared.ctx.cancelled() => return,
                _ = shared.done.cancelled() => return,
                received = queue.recv() => match received {
                    Some(job) => job,
                    None => return,
                },
            }
        };
        debug!(
            worker = index,
            path = %job.path,
            depth = job.depth,
            "listing directory"
        );
        process_dir(&shared, job).await;
    }
}

async fn process_dir(shared: &Arc<ScanShared>, job: DirJob) {
    let entries = match shared.client.list(&shared.ctx, &job.path).await {
        Ok(sourced) => sourced.into_value(),
        Err(FsError::Cancelled(_)) => {
            finish_one(shared);
            return;
        }
        Err(err) => {
            let fatal = job.depth == 0 && job.path.is_empty();
            {
                let mut progress = shared.progress.lock().await;
                progress.pending.remove(&job.path);
                if fatal {
                    warn!(
                        error = %err,
                        "scan root failed to list, aborting scan"
                    );
                    progress.fatal = Some(err);
                } else {
                    debug!(
                        path = %job.path,
                        error = %err,
                        "directory failed to list, continuing"
                    );
                    progress.report.errors.push(ScanError {
                        path: job.path.clone(),
                        error: err.to_string(),
                    });
                }
            }
            if fatal {
                shared.ctx.cancel();
            }
            finish_one(shared);
            return;
        }
    };

    // Hash and partition outside the progress lock; only bookkeeping runs
    // under it.
    let mut emitted: Vec<FileRecord> = Vec::new();
    let mut child_dirs: Vec<DirJob> = Vec::new();
    let mut bytes = 0u64;
    let mut hash_failures = 0u64;

    for mut entry in entries {
        if entry.is_dir() {
            if !shared.filter.descends_into(&entry.path) {
                continue;
            }
            let child_depth = job.depth + 1;
            if shared
                .max_depth
                .is_none_or(|limit| child_depth <= limit)
            {
                child_dirs.push(DirJob {
                    path: entry.path.clone(),
                    depth: child_depth,
                });
            }
            emitted.push(entry);
        } else {
            if !shared.filter.admits_file(&entry.path) {
                continue;
            }
            if shared.hash_contents && entry.is_file() {
                match hash_entry(shared, &entry.path).await {
                    Ok(digest) => entry.content_hash = Some(digest),
                    Err(err) => {
                        debug!(
                            path = %entry.path,
                            error = %err,
                            "content hash failed, record ships without one"
                        );
                        hash_failures += 1;
                    }
                }
            }
            bytes = bytes.saturating_add(entry.size);
            emitted.push(entry);
        }
    }

    let files = emitted.iter().filter(|record| !record.is_dir()).count() as u64;
    for record in emitted {
        if shared.records.send(record).await.is_err() {
            // Consumer hung up; stop producing. The directory stays pending
            // so a resume relists it.
            shared.aborted.store(true, Ordering::SeqCst);
            shared.ctx.cancel();
            finish_one(shared);
            return;
        }
    }

    let checkpoint_due = {
        let mut progress = shared.progress.lock().await;
        progress.pending.remove(&job.path);
        progress.completed.insert(job.path.clone());
        progress.report.dirs_listed += 1;
        progress.report.files_emitted += files;
        progress.report.bytes_seen =
            progress.report.bytes_seen.saturating_add(bytes);
        progress.report.hash_failures += hash_failures;

        child_dirs
            .retain(|child| !progress.completed.contains(&child.path));
        for child in &child_dirs {
            progress.pending.insert(child.path.clone(), child.depth);
        }

        progress.since_checkpoint += 1;
        if progress.since_checkpoint >= shared.checkpoint_interval {
            progress.since_checkpoint = 0;
            Some(snapshot_checkpoint(&progress))
        } else {
            None
        }
    };

    if let Some(checkpoint) = checkpoint_due {
        save_checkpoint(shared, &checkpoint).await;
    }

    for child in child_dirs {
        enqueue(shared, child);
    }
    finish_one(shared);
}

async fn hash_entry(shared: &ScanShared, path: &str) -> Result<String> {
    let hash_ctx = shared.ctx.child_with_timeout(shared.hash_timeout);
    let what = format!("hash {path}");
    let reader = shared.client.open(&hash_ctx, path).await?;
    hash_ctx.bound(&what, hash::hash_reader(reader)).await
}

async fn finalize(
    shared: Arc<ScanShared>,
    workers: Vec<JoinHandle<()>>,
) -> Result<ScanReport> {
    let drained = tokio::select! {
        biased;
        _ = shared.done.cancelled() => true,
        _ = shared.ctx.cancelled() => false,
        _ = deadline_expiry(&shared.ctx) => {
            shared.ctx.cancel();
            false
        }
    };
    for worker in workers {
        let _ = worker.await;
    }
    let finished_cleanly =
        drained && !shared.aborted.load(Ordering::SeqCst);

    let root_id = shared.client.root_id();
    let (report, final_checkpoint) = {
        let mut progress = shared.progress.lock().await;
        if let Some(fatal) = progress.fatal.take() {
            return Err(fatal);
        }
        progress.report.completed = finished_cleanly;
        progress.report.finished_at = Some(Utc::now());
        let checkpoint = if finished_cleanly {
            None
        } else {
            Some(snapshot_checkpoint(&progress))
        };
        (progress.report.clone(), checkpoint)
    };

    match final_checkpoint {
        None => {
            if let Err(err) = shared.checkpoints.clear(root_id).await {
                warn!(root_id = %root_id, error = %err, "checkpoint clear failed");
            }
        }
        Some(checkpoint) => save_checkpoint(&shared, &checkpoint).await,
    }

    info!(
        root_id = %root_id,
        scan_id = %report.scan_id,
        dirs = report.dirs_listed,
        files = report.files_emitted,
        bytes = report.bytes_seen,
        errors = report.errors.len(),
        completed = report.completed,
        "scan finished"
    );
    Ok(report)
}

async fn deadline_expiry(ctx: &OpContext) {
    match ctx.remaining() {
        Some(remaining) => tokio::time::sleep(remaining).await,
        None => std::future::pending().await,
    }
}

fn snapshot_checkpoint(progress: &Progress) -> ScanCheckpoint {
    let mut completed: Vec<String> =
        progress.completed.iter().cloned().collect();
    completed.sort_unstable();
    let mut pending: Vec<(String, u32)> = progress
        .pending
        .iter()
        .map(|(path, depth)| (path.clone(), *depth))
        .collect();
    pending.sort_unstable();
    ScanCheckpoint { completed, pending }
}

async fn save_checkpoint(shared: &ScanShared, checkpoint: &ScanCheckpoint) {
    if let Err(err) = shared
        .checkpoints
        .save(shared.client.root_id(), checkpoint)
        .await
    {
        warn!(error = %err, "checkpoint save failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_model::RootId;

    #[test]
    fn options_follow_the_root_config() {
        let mut config = StorageRootConfig::named("movies", "smb");
        config.max_depth = Some(3);
        config.enable_duplicate_detection = true;
        config.exclude_patterns = vec!["*.tmp".to_string()];

        let options = ScanOptions::from_root(&config);
        assert_eq!(options.max_depth, Some(3));
        assert!(options.hash_contents);
        assert_eq!(options.exclude_patterns, vec!["*.tmp".to_string()]);
        assert!(!options.resume);
        assert!(options.clone().resumed().resume);
    }

    #[test]
    fn require_complete_distinguishes_outcomes() {
        let mut report = ScanReport::begin(ScanId::new(), RootId::new());
        assert!(matches!(
            require_complete(&report),
            Err(FsError::Cancelled(_))
        ));

        report.completed = true;
        assert!(require_complete(&report).is_ok());

        report.errors.push(ScanError {
            path: "a".to_string(),
            error: "listing failed".to_string(),
        });
        assert!(matches!(
            require_complete(&report),
            Err(FsError::ScanPartial { failed: 1 })
        ));
    }
}
