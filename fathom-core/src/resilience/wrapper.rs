//! The resilient decorator around a raw protocol client.
//!
//! Every guarded call runs the same gauntlet: cancellation check, breaker
//! preflight, the live attempt under a retry loop, then cache fallback for
//! reads. The breaker hears about every contact with the backend; permanent
//! errors count as contact (the box answered, the answer was no), transient
//! ones as failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use fathom_model::{FileRecord, Protocol, RootId, Sourced};

use crate::client::{FileReader, StorageClient, clean_relative, parent_of};
use crate::context::OpContext;
use crate::error::{FsError, Result};
use crate::resilience::breaker::{CircuitBreaker, Gate};
use crate::resilience::cache::SnapshotCache;
use crate::resilience::retry::RetryPolicy;

#[derive(Debug)]
pub struct ResilientClient {
    inner: Arc<dyn StorageClient>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    cache: Arc<SnapshotCache>,
}

impl ResilientClient {
    pub fn new(
        inner: Arc<dyn StorageClient>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        cache: Arc<SnapshotCache>,
    ) -> Self {
        ResilientClient {
            inner,
            breaker,
            retry,
            cache,
        }
    }

    pub fn inner(&self) -> &Arc<dyn StorageClient> {
        &self.inner
    }

    async fn run_guarded<T, F, Fut>(
        &self,
        ctx: &OpContext,
        what: &str,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        let mut slept = Duration::ZERO;
        loop {
            ctx.check(what)?;
            if let Gate::Deny { retry_after } = self.breaker.preflight().await
            {
                return Err(FsError::BreakerOpen {
                    root_id: self.inner.root_id(),
                    retry_after,
                });
            }

            match operation().await {
                Ok(value) => {
                    self.breaker.record_success().await;
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    self.breaker.record_failure().await;
                    attempt += 1;
                    if attempt >= self.retry.max_attempts() {
                        return Err(err);
                    }
                    let delay = self.retry.delay_for(attempt - 1);
                    if slept + delay > self.retry.max_total_delay() {
                        debug!(what, "delay budget exhausted, giving up");
                        return Err(err);
                    }
                    if let Some(remaining) = ctx.remaining()
                        && delay >= remaining
                    {
                        debug!(what, "no deadline left for another attempt");
                        return Err(err);
                    }
                    debug!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    slept += delay;
                    tokio::select! {
                        _ = ctx.cancelled() => {
                            return Err(FsError::Cancelled(what.to_string()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(
                    err @ (FsError::Cancelled(_) | FsError::BreakerOpen { .. }),
                ) => {
                    // Nothing reached the backend; the breaker learns nothing.
                    return Err(err);
                }
                Err(err) => {
                    self.breaker.record_success().await;
                    return Err(err);
                }
            }
        }
    }

    fn serves_from_cache(err: &FsError) -> bool {
        err.is_transient() || matches!(err, FsError::BreakerOpen { .. })
    }

    async fn invalidate_after_mutation(&self, clean: &str) {
        let root_id = self.inner.root_id();
        self.cache.invalidate_stat(root_id, clean);
        self.cache.invalidate_listing(root_id, clean).await;
        if let Some(parent) = parent_of(clean) {
            self.cache.invalidate_listing(root_id, &parent).await;
        }
    }
}

#[async_trait]
impl StorageClient for ResilientClient {
    fn protocol(&self) -> Protocol {
        self.inner.protocol()
    }

    fn root_id(&self) -> RootId {
        self.inner.root_id()
    }

    async fn probe(&self, ctx: &OpContext) -> Result<()> {
        self.run_guarded(ctx, "probe", || self.inner.probe(ctx))
            .await
    }

    async fn list(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<Vec<FileRecord>>> {
        let clean = clean_relative(path)?;
        let what = format!("list {clean}");
        let root_id = self.inner.root_id();

        match self
            .run_guarded(ctx, &what, || self.inner.list(ctx, &clean))
            .await
        {
            Ok(sourced) => {
                self.cache
                    .store_listing(root_id, &clean, sourced.value.clone())
                    .await;
                Ok(sourced)
            }
            Err(err) if Self::serves_from_cache(&err) => {
                match self.cache.serve_listing(root_id, &clean).await {
                    Some(snapshot) => {
                        info!(
                            root_id = %root_id,
                            path = %clean,
                            fetched_at = %snapshot.fetched_at,
                            "serving stale listing from snapshot cache"
                        );
                        Ok(Sourced::cached(
                            snapshot.entries.clone(),
                            snapshot.fetched_at,
                        ))
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn stat(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<FileRecord>> {
        let clean = clean_relative(path)?;
        let what = format!("stat {clean}");
        let root_id = self.inner.root_id();

        match self
            .run_guarded(ctx, &what, || self.inner.stat(ctx, &clean))
            .await
        {
            Ok(sourced) => {
                self.cache.store_stat(root_id, &clean, sourced.value.clone());
                Ok(sourced)
            }
            Err(err) if Self::serves_from_cache(&err) => {
                match self.cache.serve_stat(root_id, &clean) {
                    Some(snapshot) => {
                        info!(
                            root_id = %root_id,
                            path = %clean,
                            fetched_at = %snapshot.fetched_at,
                            "serving stale stat from snapshot cache"
                        );
                        Ok(Sourced::cached(
                            snapshot.record.clone(),
                            snapshot.fetched_at,
                        ))
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn open(&self, ctx: &OpContext, path: &str) -> Result<FileReader> {
        let clean = clean_relative(path)?;
        let what = format!("open {clean}");
        self.run_guarded(ctx, &what, || self.inner.open(ctx, &clean))
            .await
    }

    async fn write(
        &self,
        ctx: &OpContext,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        let clean = clean_relative(path)?;
        let what = format!("write {clean}");
        self.run_guarded(ctx, &what, || self.inner.write(ctx, &clean, data))
            .await?;
        self.invalidate_after_mutation(&clean).await;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, path: &str) -> Result<()> {
        let clean = clean_relative(path)?;
        let what = format!("delete {clean}");
        self.run_guarded(ctx, &what, || self.inner.delete(ctx, &clean))
            .await?;
        self.invalidate_after_mutation(&clean).await;
        Ok(())
    }

    async fn rename(
        &self,
        ctx: &OpContext,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let from_clean = clean_relative(from)?;
        let to_clean = clean_relative(to)?;
        let what = format!("rename {from_clean}");
        self.run_guarded(ctx, &what, || {
            self.inner.rename(ctx, &from_clean, &to_clean)
        })
        .await?;
        self.invalidate_after_mutation(&from_clean).await;
        self.invalidate_after_mutation(&to_clean).await;
        Ok(())
    }

    async fn exists(&self, ctx: &OpContext, path: &str) -> Result<bool> {
        let clean = clean_relative(path)?;
        let what = format!("exists {clean}");
        self.run_guarded(ctx, &what, || self.inner.exists(ctx, &clean))
            .await
    }

    async fn create_dir(&self, ctx: &OpContext, path: &str) -> Result<()> {
        let clean = clean_relative(path)?;
        let what = format!("create_dir {clean}");
        self.run_guarded(ctx, &what, || {
            self.inner.create_dir(ctx, &clean)
        })
        .await?;
        self.invalidate_after_mutation(&clean).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Teardown must work while the breaker is open.
        self.inner.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::resilience::breaker::BreakerState;
    use fathom_config::{BreakerConfig, CacheConfig, RetryConfig};
    use fathom_model::FileKind;

    /// Fake backend whose outcomes are scripted per call, FIFO. An empty
    /// script means every call succeeds.
    #[derive(Debug)]
    struct ScriptedClient {
        root_id: RootId,
        script: Mutex<VecDeque<Result<()>>>,
        calls: AtomicUsize,
        listing: Vec<FileRecord>,
    }

    impl ScriptedClient {
        fn new(root_id: RootId) -> Self {
            ScriptedClient {
                root_id,
                script: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                listing: vec![FileRecord::new(
                    root_id,
                    "media/film.mkv",
                    FileKind::File,
                )],
            }
        }

        fn push_outcomes(
            &self,
            outcomes: impl IntoIterator<Item = Result<()>>,
        ) {
            self.script.lock().unwrap().extend(outcomes);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next_outcome(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    #[async_trait]
    impl StorageClient for ScriptedClient {
        fn protocol(&self) -> Protocol {
            Protocol::Smb
        }

        fn root_id(&self) -> RootId {
            self.root_id
        }

        async fn probe(&self, _ctx: &OpContext) -> Result<()> {
            self.next_outcome()
        }

        async fn list(
            &self,
            _ctx: &OpContext,
            _path: &str,
        ) -> Result<Sourced<Vec<FileRecord>>> {
            self.next_outcome()?;
            Ok(Sourced::live(self.listing.clone()))
        }

        async fn stat(
            &self,
            _ctx: &OpContext,
            path: &str,
        ) -> Result<Sourced<FileRecord>> {
            self.next_outcome()?;
            Ok(Sourced::live(FileRecord::new(
                self.root_id,
                path,
                FileKind::File,
            )))
        }

        async fn open(
            &self,
            _ctx: &OpContext,
            _path: &str,
        ) -> Result<FileReader> {
            self.next_outcome()?;
            Ok(Box::new(std::io::Cursor::new(Vec::new())) as FileReader)
        }

        async fn write(
            &self,
            _ctx: &OpContext,
            _path: &str,
            _data: &[u8],
        ) -> Result<()> {
            self.next_outcome()
        }

        async fn delete(&self, _ctx: &OpContext, _path: &str) -> Result<()> {
            self.next_outcome()
        }

        async fn rename(
            &self,
            _ctx: &OpContext,
            _from: &str,
            _to: &str,
        ) -> Result<()> {
            self.next_outcome()
        }

        async fn exists(&self, _ctx: &OpContext, _path: &str) -> Result<bool> {
            self.next_outcome()?;
            Ok(true)
        }

        async fn create_dir(
            &self,
            _ctx: &OpContext,
            _path: &str,
        ) -> Result<()> {
            self.next_outcome()
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            backoff_base_ms: 1,
            backoff_max_ms: 4,
            max_total_delay_ms: 1_000,
            jitter_ratio: 0.0,
        })
    }

    fn harness(
        threshold: u32,
        max_attempts: u32,
    ) -> (Arc<ScriptedClient>, ResilientClient) {
        let root_id = RootId::new();
        let scripted = Arc::new(ScriptedClient::new(root_id));
        let breaker = Arc::new(CircuitBreaker::new(
            root_id,
            BreakerConfig {
                failure_threshold: threshold,
                window_ms: 60_000,
                cooldown_ms: 60_000,
            },
        ));
        let cache = Arc::new(SnapshotCache::new(CacheConfig::default()));
        let wrapper = ResilientClient::new(
            scripted.clone() as Arc<dyn StorageClient>,
            breaker,
            fast_retry(max_attempts),
            cache,
        );
        (scripted, wrapper)
    }

    fn transient() -> FsError {
        FsError::Transient("smb: connection reset".to_string())
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let (scripted, wrapper) = harness(5, 3);
        scripted.push_outcomes([Err(transient()), Err(transient()), Ok(())]);

        let ctx = OpContext::unbounded();
        let listing = wrapper.list(&ctx, "media").await.unwrap();
        assert!(!listing.is_stale());
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_without_retry() {
        let (scripted, wrapper) = harness(5, 3);
        scripted.push_outcomes([Err(FsError::Permanent(
            "smb: access denied".to_string(),
        ))]);

        let ctx = OpContext::unbounded();
        let result = wrapper.delete(&ctx, "media/film.mkv").await;
        assert!(matches!(result, Err(FsError::Permanent(_))));
        assert_eq!(scripted.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_error() {
        let (scripted, wrapper) = harness(10, 3);
        scripted.push_outcomes([
            Err(transient()),
            Err(transient()),
            Err(transient()),
        ]);

        let ctx = OpContext::unbounded();
        let result = wrapper.probe(&ctx).await;
        assert!(matches!(result, Err(FsError::Transient(_))));
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn total_delay_budget_cuts_retries_short() {
        let root_id = RootId::new();
        let scripted = Arc::new(ScriptedClient::new(root_id));
        let wrapper = ResilientClient::new(
            scripted.clone() as Arc<dyn StorageClient>,
            Arc::new(CircuitBreaker::new(root_id, BreakerConfig::default())),
            RetryPolicy::new(RetryConfig {
                max_attempts: 5,
                backoff_base_ms: 100,
                backoff_max_ms: 100,
                max_total_delay_ms: 50,
                jitter_ratio: 0.0,
            }),
            Arc::new(SnapshotCache::new(CacheConfig::default())),
        );
        scripted.push_outcomes([Err(transient())]);

        let ctx = OpContext::unbounded();
        let result = wrapper.probe(&ctx).await;
        assert!(matches!(result, Err(FsError::Transient(_))));
        // The first backoff sleep alone would cross the 50 ms budget, so
        // the remaining four attempts are never made.
        assert_eq!(scripted.calls(), 1);
    }

    #[tokio::test]
    async fn open_breaker_blocks_calls_and_cache_answers_reads() {
        let (scripted, wrapper) = harness(2, 1);
        let ctx = OpContext::unbounded();

        // Prime the cache with one live listing.
        wrapper.list(&ctx, "media").await.unwrap();
        assert_eq!(scripted.calls(), 1);

        // Two transient failures open the breaker; both are already served
        // stale from the snapshot.
        scripted.push_outcomes([Err(transient()), Err(transient())]);
        for _ in 0..2 {
            let listing = wrapper.list(&ctx, "media").await.unwrap();
            assert!(listing.is_stale());
        }
        assert_eq!(scripted.calls(), 3);

        // Breaker open: the backend is not contacted, the cache still
        // answers, and non-cacheable calls get the dedicated error.
        let listing = wrapper.list(&ctx, "media").await.unwrap();
        assert!(listing.is_stale());
        assert_eq!(scripted.calls(), 3);

        let denied = wrapper.open(&ctx, "media/film.mkv").await;
        assert!(matches!(denied, Err(FsError::BreakerOpen { .. })));
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn cache_miss_propagates_the_original_error() {
        let (scripted, wrapper) = harness(5, 1);
        scripted.push_outcomes([Err(transient())]);

        let ctx = OpContext::unbounded();
        let result = wrapper.list(&ctx, "media").await;
        assert!(matches!(result, Err(FsError::Transient(_))));
    }

    #[tokio::test]
    async fn stat_serves_stale_after_success_then_outage() {
        let (scripted, wrapper) = harness(5, 1);
        let ctx = OpContext::unbounded();

        wrapper.stat(&ctx, "media/film.mkv").await.unwrap();
        scripted.push_outcomes([Err(transient())]);

        let stale = wrapper.stat(&ctx, "media/film.mkv").await.unwrap();
        assert!(stale.is_stale());
        assert_eq!(stale.value.path, "media/film.mkv");
    }

    #[tokio::test]
    async fn mutation_invalidates_cached_parent_listing() {
        let (scripted, wrapper) = harness(5, 1);
        let ctx = OpContext::unbounded();

        wrapper.list(&ctx, "media").await.unwrap();
        wrapper.write(&ctx, "media/new.mkv", b"x").await.unwrap();

        // The stale listing would no longer match the backend, so the next
        // failed list has nothing to fall back on.
        scripted.push_outcomes([Err(transient())]);
        let result = wrapper.list(&ctx, "media").await;
        assert!(matches!(result, Err(FsError::Transient(_))));
    }

    #[tokio::test]
    async fn cancelled_context_reports_nothing_to_the_breaker() {
        let (scripted, wrapper) = harness(1, 3);
        let ctx = OpContext::unbounded();
        ctx.cancel();

        let result = wrapper.probe(&ctx).await;
        assert!(matches!(result, Err(FsError::Cancelled(_))));
        assert_eq!(scripted.calls(), 0);
        assert_eq!(wrapper.breaker.state(), BreakerState::Closed);
    }
}
