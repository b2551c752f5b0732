//! SMB/CIFS storage through a kernel mount.
//!
//! Mirrors the NFS client: `mount.cifs` attaches `//host/share` and the
//! local delegate does the filesystem work. The password travels in the
//! `PASSWD` environment variable understood by mount.cifs rather than on
//! the command line.

use std::path::PathBuf;

use async_trait::async_trait;

use fathom_config::Secret;
use fathom_model::{FileRecord, Protocol, RootId, Sourced};

use crate::client::local::LocalClient;
use crate::client::mount::{self, MountSpec};
use crate::client::{FileReader, StorageClient};
use crate::context::OpContext;
use crate::error::Result;

#[derive(Debug)]
pub struct SmbClient {
    root_id: RootId,
    spec: MountSpec,
    local: LocalClient,
}

#[derive(Debug, Default)]
pub struct SmbCredentials {
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub domain: Option<String>,
}

impl SmbClient {
    pub fn new(
        root_id: RootId,
        host: &str,
        share: &str,
        mount_point: impl Into<PathBuf>,
        credentials: SmbCredentials,
        extra_options: Option<&str>,
    ) -> Self {
        let mount_point = mount_point.into();
        let mut options = Vec::new();
        let mut env = Vec::new();

        match credentials.username.as_deref() {
            Some(user) if !user.is_empty() => {
                options.push(format!("username={user}"));
                if let Some(domain) = credentials.domain.as_deref()
                    && !domain.is_empty()
                {
                    options.push(format!("domain={domain}"));
                }
                match &credentials.password {
                    Some(password) if !password.is_empty() => {
                        env.push((
                            "PASSWD".to_string(),
                            password.expose().to_string(),
                        ));
                    }
                    _ => options.push("password=".to_string()),
                }
            }
            _ => options.push("guest".to_string()),
        }
        if let Some(extra) = extra_options
            && !extra.trim().is_empty()
        {
            options.push(extra.trim().to_string());
        }

        let share = share.trim_matches('/');
        let spec = MountSpec {
            source: format!("//{host}/{share}"),
            mount_point: mount_point.clone(),
            fstype: "cifs",
            options: options.join(","),
            env,
        };
        SmbClient {
            root_id,
            spec,
            local: LocalClient::delegate(root_id, Protocol::Smb, mount_point),
        }
    }

    async fn ensure(&self, ctx: &OpContext) -> Result<()> {
        mount::ensure_mounted(ctx, &self.spec).await
    }
}

#[async_trait]
impl StorageClient for SmbClient {
    fn protocol(&self) -> Protocol {
        Protocol::Smb
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
