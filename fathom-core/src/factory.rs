//! Validating client factory.
//!
//! The protocol arrives as a plain string in configuration and is parsed
//! here; required fields are checked per protocol before any client is
//! constructed, so a bad root fails at registration with a `Config` error
//! instead of limping along and failing mid-scan. Network-backed clients
//! come back wrapped in the resilience stack; local roots are returned bare.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use fathom_config::{HealthConfig, ResilienceConfig, StorageRootConfig};
use fathom_model::{ConnectionState, HealthReport, Protocol, RootId};

use crate::client::{
    FtpClient, LocalClient, NfsClient, SmbClient, SmbCredentials,
    StorageClient, WebdavClient,
};
use crate::context::OpContext;
use crate::error::{FsError, Result};
use crate::resilience::{
    BreakerRegistry, ResilientClient, RetryPolicy, SnapshotCache,
};

/// Mount targets default to a per-root directory under here.
const DEFAULT_MOUNT_BASE: &str = "/mnt/fathom";

#[derive(Debug)]
pub struct ClientFactory {
    resilience: ResilienceConfig,
    breakers: Arc<BreakerRegistry>,
    cache: Arc<SnapshotCache>,
}

impl ClientFactory {
    pub fn new(
        resilience: ResilienceConfig,
        cache: Arc<SnapshotCache>,
    ) -> Self {
        ClientFactory {
            breakers: Arc::new(BreakerRegistry::new(
                resilience.breaker.clone(),
            )),
            resilience,
            cache,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// Validated client for a root, wrapped in retry/breaker/cache when the
    /// backend is remote.
    pub fn build(
        &self,
        root_id: RootId,
        config: &StorageRootConfig,
    ) -> Result<Arc<dyn StorageClient>> {
        let raw = self.build_raw(root_id, config)?;
        if !raw.protocol().is_network() {
            return Ok(raw);
        }
        debug!(
            root_id = %root_id,
            protocol = raw.protocol().as_str(),
            "wrapping network client in resilience stack"
        );
        Ok(Arc::new(ResilientClient::new(
            raw,
            self.breakers.for_root(root_id),
            RetryPolicy::new(self.resilience.retry.clone()),
            self.cache.clone(),
        )))
    }

    /// Raw protocol client, no resilience. Connection tests use this so a
    /// failure is reported as-is instead of being retried or cached over.
    pub fn build_raw(
        &self,
        root_id: RootId,
        config: &StorageRootConfig,
    ) -> Result<Arc<dyn StorageClient>> {
        let protocol: Protocol = config.protocol.parse().map_err(|_| {
            FsError::Config(format!(
                "root {}: unknown protocol {:?}",
                config.name, config.protocol
            ))
        })?;

        match protocol {
            Protocol::Local => {
                let path = require(config, "path", non_empty(&config.path))?;
                Ok(Arc::new(LocalClient::new(root_id, path)))
            }
            Protocol::Nfs => {
                let host = require(config, "host", config.host.as_deref())?;
                let export =
                    require(config, "path", non_empty(&config.path))?;
                Ok(Arc::new(NfsClient::new(
                    root_id,
                    host,
                    export,
                    self.mount_point_for(root_id, config),
                    config.options.as_deref(),
                )))
            }
            Protocol::Smb => {
                let host = require(config, "host", config.host.as_deref())?;
                let share = require(config, "path", non_empty(&config.path))?;
                let credentials = SmbCredentials {
                    username: config.username.clone(),
                    password: config.password.clone(),
                    domain: config.domain.clone(),
                };
                Ok(Arc::new(SmbClient::new(
                    root_id,
                    host,
                    share,
                    self.mount_point_for(root_id, config),
                    credentials,
                    config.options.as_deref(),
                )))
            }
            Protocol::Ftp => {
                let host = require(config, "host", config.host.as_deref())?;
                let port = config
                    .port
                    .or_else(|| protocol.default_port())
                    .unwrap_or(21);
                Ok(Arc::new(FtpClient::new(
                    root_id,
                    host,
                    port,
                    config.username.clone(),
                    config.password.clone(),
                    &config.path,
                )))
            }
            Protocol::Webdav => {
                let url = require(config, "url", config.url.as_deref())?;
                Ok(Arc::new(WebdavClient::new(
                    root_id,
                    url,
                    config.username.clone(),
                    config.password.clone(),
                )?))
            }
        }
    }

    /// One on-demand probe, reported the way the health monitor would.
    pub async fn test_connection(
        &self,
        root_id: RootId,
        config: &StorageRootConfig,
        health: &HealthConfig,
    ) -> Result<HealthReport> {
        let client = self.build_raw(root_id, config)?;
        let ctx = OpContext::with_timeout(health.check_timeout());
        let started = std::time::Instant::now();
        let outcome = client.probe(&ctx).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        Ok(match outcome {
            Ok(()) => HealthReport {
                root_id,
                protocol: client.protocol(),
                state: ConnectionState::Connected,
                latency_ms: Some(latency_ms),
                checked_at: Utc::now(),
                error: None,
            },
            Err(err) => HealthReport {
                root_id,
                protocol: client.protocol(),
                state: ConnectionState::Offline,
                latency_ms: None,
                checked_at: Utc::now(),
                error: Some(err.to_string()),
            },
        })
    }

    fn mount_point_for(
        &self,
        root_id: RootId,
        config: &StorageRootConfig,
    ) -> PathBuf {
        match config
            .mount_point
            .as_deref()
            .filter(|point| !point.trim().is_empty())
        {
            Some(explicit) => PathBuf::from(explicit),
            None => PathBuf::from(DEFAULT_MOUNT_BASE).join(root_id.to_string()),
        }
    }
}

fn require<'v>(
    config: &StorageRootConfig,
    field: &str,
    value: Option<&'v str>,
) -> Result<&'v str> {
    match value {
        Some(found) if !found.trim().is_empty() => Ok(found),
        _ => Err(FsError::Config(format!(
            "root {}: protocol {:?} requires `{field}`",
            config.name, config.protocol
        ))),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_config::CacheConfig;

    fn factory() -> ClientFactory {
        ClientFactory::new(
            ResilienceConfig::default(),
            Arc::new(SnapshotCache::new(CacheConfig::default())),
        )
    }

    #[test]
    fn unknown_protocol_is_a_config_error() {
        let factory = factory();
        let config = StorageRootConfig::named("bad", "gopher");
        let result = factory.build(RootId::new(), &config);
        assert!(matches!(result, Err(FsError::Config(_))));
    }

    #[test]
    fn smb_without_host_is_rejected() {
        let factory = factory();
        let mut config = StorageRootConfig::named("movies", "smb");
        config.path = "media".to_string();
        let err = factory.build(RootId::new(), &config).unwrap_err();
        match err {
            FsError::Config(message) => assert!(message.contains("host")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn local_without_path_is_rejected() {
        let factory = factory();
        let config = StorageRootConfig::named("disk", "local");
        assert!(matches!(
            factory.build(RootId::new(), &config),
            Err(FsError::Config(_))
        ));
    }

    #[test]
    fn webdav_requires_a_parseable_url() {
        let factory = factory();
        let mut config = StorageRootConfig::named("dav", "webdav");
        config.url = Some("not a url".to_string());
        assert!(matches!(
            factory.build(RootId::new(), &config),
            Err(FsError::Config(_))
        ));
    }

    #[test]
    fn local_roots_come_back_unwrapped() {
        let factory = factory();
        let mut config = StorageRootConfig::named("disk", "local");
        config.path = "/srv/media".to_string();
        let client = factory.build(RootId::new(), &config).unwrap();
        assert_eq!(client.protocol(), Protocol::Local);
        // Local IO fails fast on its own; no breaker is created for it.
        assert!(factory.breakers().get(client.root_id()).is_none());
    }

    #[test]
    fn network_roots_are_wrapped_with_a_breaker() {
        let factory = factory();
        let root_id = RootId::new();
        let mut config = StorageRootConfig::named("ftp", "ftp");
        config.host = Some("ftp.local".to_string());
        let client = factory.build(root_id, &config).unwrap();
        assert_eq!(client.protocol(), Protocol::Ftp);
        assert!(factory.breakers().get(root_id).is_some());
    }

    #[test]
    fn protocol_aliases_resolve() {
        let factory = factory();
        let mut config = StorageRootConfig::named("share", "cifs");
        config.host = Some("nas.local".to_string());
        config.path = "media".to_string();
        let client = factory.build(RootId::new(), &config).unwrap();
        assert_eq!(client.protocol(), Protocol::Smb);
    }

    #[tokio::test]
    async fn test_connection_reports_failure_as_offline() {
        let factory = factory();
        let mut config = StorageRootConfig::named("disk", "local");
        config.path = "/nonexistent/fathom-test-root".to_string();
        let report = factory
            .test_connection(
                RootId::new(),
                &config,
                &HealthConfig::default(),
            )
            .await
            .unwrap();
        assert!(!report.healthy());
        assert!(report.error.is_some());
    }
}
