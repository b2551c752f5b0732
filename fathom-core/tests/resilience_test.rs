use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use fathom_config::{BreakerConfig, CacheConfig, RetryConfig};
use fathom_core::client::{FileReader, StorageClient};
use fathom_core::context::OpContext;
use fathom_core::error::{FsError, Result};
use fathom_core::resilience::{
    BreakerState, CircuitBreaker, ResilientClient, RetryPolicy, SnapshotCache,
};
use fathom_model::{FileKind, FileRecord, Protocol, RootId, Sourced};

/// A share that can be taken down and brought back at will.
#[derive(Debug)]
struct ToggleClient {
    root_id: RootId,
    down: AtomicBool,
    list_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl ToggleClient {
    fn new(root_id: RootId) -> Self {
        ToggleClient {
            root_id,
            down: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check_up(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(FsError::Transient("share unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn listing(&self) -> Vec<FileRecord> {
        let mut record =
            FileRecord::new(self.root_id, "movies/film.mkv", FileKind::File);
        record.size = 7;
        vec![record]
    }
}

#[async_trait]
impl StorageClient for ToggleClient {
    fn protocol(&self) -> Protocol {
        Protocol::Smb
    }

    fn root_id(&self) -> RootId {
        self.root_id
    }

    async fn probe(&self, _ctx: &OpContext) -> Result<()> {
        self.check_up()
    }

    async fn list(
        &self,
        _ctx: &OpContext,
        _path: &str,
    ) -> Result<Sourced<Vec<FileRecord>>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        Ok(Sourced::live(self.listing()))
    }

    async fn stat(
        &self,
        _ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<FileRecord>> {
        self.check_up()?;
        Err(FsError::NotFound(path.to_string()))
    }

    async fn open(&self, _ctx: &OpContext, _path: &str) -> Result<FileReader> {
        self.check_up()?;
        Err(FsError::Internal("no contents scripted".into()))
    }

    async fn write(
        &self,
        _ctx: &OpContext,
        _path: &str,
        _data: &[u8],
    ) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.check_up()
    }

    async fn delete(&self, _ctx: &OpContext, _path: &str) -> Result<()> {
        self.check_up()
    }

    async fn rename(
        &self,
        _ctx: &OpContext,
        _from: &str,
        _to: &str,
    ) -> Result<()> {
        self.check_up()
    }

    async fn exists(&self, _ctx: &OpContext, _path: &str) -> Result<bool> {
        self.check_up()?;
        Ok(true)
    }

    async fn create_dir(&self, _ctx: &OpContext, _path: &str) -> Result<()> {
        self.check_up()
    }
}

struct Harness {
    client: Arc<ToggleClient>,
    breaker: Arc<CircuitBreaker>,
    resilient: ResilientClient,
}

fn harness(cooldown_ms: u64) -> Harness {
    let root_id = RootId::new();
    let client = Arc::new(ToggleClient::new(root_id));
    let breaker = Arc::new(CircuitBreaker::new(
        root_id,
        BreakerConfig {
            failure_threshold: 2,
            window_ms: 60_000,
            cooldown_ms,
        },
    ));
    let retry = RetryPolicy::new(RetryConfig {
        max_attempts: 1,
        backoff_base_ms: 1,
        ..RetryConfig::default()
    });
    let cache = Arc::new(SnapshotCache::new(CacheConfig::default()));
    let resilient =
        ResilientClient::new(client.clone(), breaker.clone(), retry, cache);
    Harness {
        client,
        breaker,
        resilient,
    }
}

#[tokio::test]
async fn outage_is_bridged_by_the_cache_and_recovery_closes_the_breaker() {
    let harness = harness(50);
    let ctx = OpContext::unbounded();

    // Healthy: the listing is live and primes the snapshot cache.
    let listing = harness.resilient.list(&ctx, "movies").await.unwrap();
    assert!(!listing.is_stale());
    assert_eq!(listing.value.len(), 1);
    assert_eq!(harness.client.list_calls.load(Ordering::SeqCst), 1);

    // Outage: the share stops answering, but callers keep getting the
    // stale listing while the failures trip the breaker.
    harness.client.set_down(true);
    for _ in 0..2 {
        let stale = harness.resilient.list(&ctx, "movies").await.unwrap();
        assert!(stale.is_stale());
        assert_eq!(stale.value.len(), 1);
    }
    assert_eq!(harness.breaker.state(), BreakerState::Open);
    assert_eq!(harness.client.list_calls.load(Ordering::SeqCst), 3);

    // Open: reads are answered without touching the backend at all.
    let stale = harness.resilient.list(&ctx, "movies").await.unwrap();
    assert!(stale.is_stale());
    assert_eq!(harness.client.list_calls.load(Ordering::SeqCst), 3);

    // Mutations have no snapshot to fall back on.
    let err = harness
        .resilient
        .write(&ctx, "movies/new.mkv", b"x")
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::BreakerOpen { .. }));
    assert_eq!(harness.client.write_calls.load(Ordering::SeqCst), 0);

    // Recovery: after the cooldown one probe goes through, closes the
    // breaker, and listings are live again.
    harness.client.set_down(false);
    tokio::time::sleep(Duration::from_millis(80)).await;
    let recovered = harness.resilient.list(&ctx, "movies").await.unwrap();
    assert!(!recovered.is_stale());
    assert_eq!(harness.breaker.state(), BreakerState::Closed);
    assert_eq!(harness.client.list_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn failed_probe_buys_the_share_another_cooldown() {
    let harness = harness(40);
    let ctx = OpContext::unbounded();

    harness.client.set_down(true);
    for _ in 0..2 {
        let err = harness.resilient.exists(&ctx, "movies").await.unwrap_err();
        assert!(err.is_transient());
    }
    assert_eq!(harness.breaker.state(), BreakerState::Open);

    // Cooldown passes but the share is still down: the probe fails and
    // the breaker reopens with a fresh cooldown.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let err = harness.resilient.exists(&ctx, "movies").await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(harness.breaker.state(), BreakerState::Open);

    // Inside that fresh cooldown nothing reaches the backend, and with no
    // snapshot primed the denial surfaces as-is.
    let calls = harness.client.list_calls.load(Ordering::SeqCst);
    let err = harness.resilient.list(&ctx, "movies").await.unwrap_err();
    assert!(matches!(err, FsError::BreakerOpen { .. }));
    assert_eq!(harness.client.list_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn permanent_answers_do_not_consume_the_failure_budget() {
    let harness = harness(60_000);
    let ctx = OpContext::unbounded();

    // A NotFound is the share answering, not the share failing; no number
    // of them should open the breaker.
    for _ in 0..5 {
        let err = harness
            .resilient
            .stat(&ctx, "missing.mkv")
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }
    assert_eq!(harness.breaker.state(), BreakerState::Closed);
}
