//! The unified storage client contract and its protocol implementations.
//!
//! All paths crossing this boundary are relative to the storage root and use
//! `/` separators regardless of backend. [`clean_relative`] normalizes and
//! validates them once, at the edge.

pub mod ftp;
pub mod local;
pub(crate) mod mount;
pub mod nfs;
pub mod smb;
pub mod webdav;

use std::fmt;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use fathom_model::{FileRecord, Protocol, RootId, Sourced};

use crate::context::OpContext;
use crate::error::{FsError, Result};

pub use ftp::FtpClient;
pub use local::LocalClient;
pub use nfs::NfsClient;
pub use smb::{SmbClient, SmbCredentials};
pub use webdav::WebdavClient;

/// Streaming handle to a file's contents.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Uniform capability surface over one storage root.
///
/// Implementations classify their failures into the [`FsError`] taxonomy and
/// observe the [`OpContext`] cancellation token and deadline on every call.
/// `list` and `stat` results carry provenance so the resilient wrapper can
/// substitute cached snapshots without changing the signature.
#[async_trait]
pub trait StorageClient: Send + Sync + fmt::Debug {
    fn protocol(&self) -> Protocol;

    fn root_id(&self) -> RootId;

    /// Cheap liveness check used by connection tests and the health
    /// monitor.
    async fn probe(&self, ctx: &OpContext) -> Result<()>;

    /// Enumerate the direct children of a directory.
    async fn list(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<Vec<FileRecord>>>;

    /// Metadata for a single entry.
    async fn stat(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<FileRecord>>;

    /// Read a file's contents.
    async fn open(&self, ctx: &OpContext, path: &str) -> Result<FileReader>;

    /// Create or replace a file's contents.
    async fn write(
        &self,
        ctx: &OpContext,
        path: &str,
        data: &[u8],
    ) -> Result<()>;

    /// Remove a file or an empty directory.
    async fn delete(&self, ctx: &OpContext, path: &str) -> Result<()>;

    async fn rename(
        &self,
        ctx: &OpContext,
        from: &str,
        to: &str,
    ) -> Result<()>;

    async fn exists(&self, ctx: &OpContext, path: &str) -> Result<bool>;

    /// Create a directory, parents included.
    async fn create_dir(&self, ctx: &OpContext, path: &str) -> Result<()>;

    /// Release backend resources (unmount, close sessions). Idempotent.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Normalize a root-relative path: `/` separators, no empty or `.`
/// components, no traversal. Returns the cleaned path, `""` for the root
/// itself.
pub fn clean_relative(path: &str) -> Result<String> {
    if path.contains('\0') {
        return Err(FsError::Permanent(format!(
            "path contains NUL byte: {path:?}"
        )));
    }
    let normalized = path.replace('\\', "/");
    let mut parts = Vec::new();
    for component in normalized.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                return Err(FsError::Permanent(format!(
                    "path traversal rejected: {path}"
                )));
            }
            part => parts.push(part),
        }
    }
    Ok(parts.join("/"))
}

/// Parent of a cleaned relative path. The root has no parent.
pub fn parent_of(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    match path.rsplit_once('/') {
        Some((parent, _)) => Some(parent.to_string()),
        None => Some(String::new()),
    }
}

/// Join a cleaned directory path and an entry name.
pub fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_relative_normalizes() {
        assert_eq!(clean_relative("a/b/c").unwrap(), "a/b/c");
        assert_eq!(clean_relative("/a//b/./c/").unwrap(), "a/b/c");
        assert_eq!(clean_relative("a\\b").unwrap(), "a/b");
        assert_eq!(clean_relative("").unwrap(), "");
        assert_eq!(clean_relative("/").unwrap(), "");
    }

    #[test]
    fn clean_relative_rejects_traversal() {
        assert!(clean_relative("../etc/passwd").is_err());
        assert!(clean_relative("a/../../b").is_err());
        assert!(clean_relative("a/\0").is_err());
    }

    #[test]
    fn parent_and_join() {
        assert_eq!(parent_of("a/b/c").as_deref(), Some("a/b"));
        assert_eq!(parent_of("a").as_deref(), Some(""));
        assert_eq!(parent_of(""), None);
        assert_eq!(join_rel("", "x"), "x");
        assert_eq!(join_rel("a/b", "x"), "a/b/x");
    }
}
