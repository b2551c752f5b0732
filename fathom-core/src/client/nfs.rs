//! NFS storage through a kernel mount.
//!
//! The export is attached at a local mount point and all operations run
//! against the VFS; the client's own job is mount lifecycle and NFS-flavored
//! option handling.

use std::path::PathBuf;

use async_trait::async_trait;

use fathom_model::{FileRecord, Protocol, RootId, Sourced};

use crate::client::local::LocalClient;
use crate::client::mount::{self, MountSpec};
use crate::client::{FileReader, StorageClient};
use crate::context::OpContext;
use crate::error::Result;

/// Default protocol version matches what most NAS appliances export.
const DEFAULT_OPTIONS: &str = "vers=3";

#[derive(Debug)]
pub struct NfsClient {
    root_id: RootId,
    spec: MountSpec,
    local: LocalClient,
}

impl NfsClient {
    pub fn new(
        root_id: RootId,
        host: &str,
        export: &str,
        mount_point: impl Into<PathBuf>,
        extra_options: Option<&str>,
    ) -> Self {
        let mount_point = mount_point.into();
        let mut options = DEFAULT_OPTIONS.to_string();
        if let Some(extra) = extra_options
            && !extra.trim().is_empty()
        {
            options.push(',');
            options.push_str(extra.trim());
        }
        let spec = MountSpec {
            source: format!("{host}:{export}"),
            mount_point: mount_point.clone(),
            fstype: "nfs",
            options,
            env: Vec::new(),
        };
        NfsClient {
            root_id,
            spec,
            local: LocalClient::delegate(root_id, Protocol::Nfs, mount_point),
        }
    }

    async fn ensure(&self, ctx: &OpContext) -> Result<()> {
        mount::ensure_mounted(ctx, &self.spec).await
    }
}

#[async_trait]
impl StorageClient for NfsClient {
    fn protocol(&self) -> Protocol {
        Protocol::Nfs
    }

    fn root_id(&self) -> RootId {
        self.root_id
    }

    async fn probe(&self, ctx: &OpContext) -> Result<()> {
        self.ensure(ctx).await?;
        self.local.probe(ctx).await
    }

    async fn list(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<Vec<FileRecord>>> {
        self.ensure(ctx).await?;
        self.local.list(ctx, path).await
    }

    async fn stat(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<FileRecord>> {
        self.ensure(ctx).await?;
        self.local.stat(ctx, path).await
    }

    async fn open(&self, ctx: &OpContext, path: &str) -> Result<FileReader> {
        self.ensure(ctx).await?;
        self.local.open(ctx, path).await
    }

    async fn write(
        &self,
        ctx: &OpContext,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        self.ensure(ctx).await?;
        self.local.write(ctx, path, data).await
    }

    async fn delete(&self, ctx: &OpContext, path: &str) -> Result<()> {
        self.ensure(ctx).await?;
        self.local.delete(ctx, path).await
    }

    async fn rename(
        &self,
        ctx: &OpContext,
        from: &str,
        to: &str,
    ) -> Result<()> {
        self.ensure(ctx).await?;
        self.local.rename(ctx, from, to).await
    }

    async fn exists(&self, ctx: &OpContext, path: &str) -> Result<bool> {
        self.ensure(ctx).await?;
        self.local.exists(ctx, path).await
    }

    async fn create_dir(&self, ctx: &OpContext, path: &str) -> Result<()> {
        self.ensure(ctx).await?;
        self.local.create_dir(ctx, path).await
    }

    async fn disconnect(&self) -> Result<()> {
        mount::unmount(&self.spec.mount_point).await
    }
}
