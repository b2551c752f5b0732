//! Direct-attached storage via `tokio::fs`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use fathom_model::{FileKind, FileRecord, Protocol, RootId, Sourced};

use crate::client::{FileReader, StorageClient, clean_relative, join_rel};
use crate::context::OpContext;
use crate::error::{FsError, Result};

/// Client for a local directory tree. Also the delegate for mount-backed
/// protocols once their remote tree is attached to the VFS.
#[derive(Debug, Clone)]
pub struct LocalClient {
    root_id: RootId,
    protocol: Protocol,
    base: PathBuf,
}

impl LocalClient {
    pub fn new(root_id: RootId, base: impl Into<PathBuf>) -> Self {
        LocalClient {
            root_id,
            protocol: Protocol::Local,
            base: base.into(),
        }
    }

    /// For mount-backed clients that delegate here but report their own
    /// protocol.
    pub(crate) fn delegate(
        root_id: RootId,
        protocol: Protocol,
        base: impl Into<PathBuf>,
    ) -> Self {
        LocalClient {
            root_id,
            protocol,
            base: base.into(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf)> {
        let clean = clean_relative(path)?;
        let abs = if clean.is_empty() {
            self.base.clone()
        } else {
            self.base.join(&clean)
        };
        Ok((clean, abs))
    }

    fn record_from(
        &self,
        rel: String,
        meta: &std::fs::Metadata,
    ) -> FileRecord {
        let file_type = meta.file_type();
        let kind = if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::File
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Other
        };
        let mut record = FileRecord::new(self.root_id, rel, kind);
        record.size = meta.len();
        record.modified = meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);
        record
    }
}

#[async_trait]
impl StorageClient for LocalClient {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn root_id(&self) -> RootId {
        self.root_id
    }

    async fn probe(&self, ctx: &OpContext) -> Result<()> {
        let base = self.base.clone();
        ctx.bound("probe", async move {
            let meta = fs::metadata(&base).await.map_err(|err| {
                FsError::from_io(&format!("probe {}", base.display()), err)
            })?;
            if !meta.is_dir() {
                return Err(FsError::Permanent(format!(
                    "storage root {} is not a directory",
                    base.display()
                )));
            }
            Ok(())
        })
        .await
    }

    async fn list(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<Vec<FileRecord>>> {
        let (clean, abs) = self.resolve(path)?;
        let what = format!("list {clean}");
        ctx.bound(&what, async {
            let mut dir = fs::read_dir(&abs)
                .await
                .map_err(|err| FsError::from_io(&what, err))?;
            let mut records = Vec::new();
            loop {
                ctx.check(&what)?;
                let Some(entry) = dir
                    .next_entry()
                    .await
                    .map_err(|err| FsError::from_io(&what, err))?
                else {
                    break;
                };
                let name = entry.file_name().to_string_lossy().into_owned();
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    // Entry vanished between readdir and stat; skip it.
                    Err(err)
                        if err.kind() == std::io::ErrorKind::NotFound =>
                    {
                        continue;
                    }
                    Err(err) => return Err(FsError::from_io(&what, err)),
                };
                records
                    .push(self.record_from(join_rel(&clean, &name), &meta));
            }
            Ok(Sourced::live(records))
        })
        .await
    }

    async fn stat(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<FileRecord>> {
        let (clean, abs) = self.resolve(path)?;
        let what = format!("stat {clean}");
        ctx.bound(&what, async {
            let meta = fs::symlink_metadata(&abs)
                .await
                .map_err(|err| FsError::from_io(&what, err))?;
            Ok(Sourced::live(self.record_from(clean.clone(), &meta)))
        })
        .await
    }

    async fn open(&self, ctx: &OpContext, path: &str) -> Result<FileReader> {
        let (clean, abs) = self.resolve(path)?;
        let what = format!("open {clean}");
        ctx.bound(&what, async {
            let file = fs::File::open(&abs)
                .await
                .map_err(|err| FsError::from_io(&what, err))?;
            Ok(Box::new(file) as FileReader)
        })
        .await
    }

    async fn write(
        &self,
        ctx: &OpContext,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        let (clean, abs) = self.resolve(path)?;
        let what = format!("write {clean}");
        ctx.bound(&what, async {
            if let Some(parent) = abs.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|err| FsError::from_io(&what, err))?;
            }
            fs::write(&abs, data)
                .await
                .map_err(|err| FsError::from_io(&what, err))
        })
        .await
    }

    async fn delete(&self, ctx: &OpContext, path: &str) -> Result<()> {
        let (clean, abs) = self.resolve(path)?;
        let what = format!("delete {clean}");
        ctx.bound(&what, async {
            let meta = fs::symlink_metadata(&abs)
                .await
                .map_err(|err| FsError::from_io(&what, err))?;
            if meta.is_dir() {
                fs::remove_dir(&abs)
                    .await
                    .map_err(|err| FsError::from_io(&what, err))
            } else {
                fs::remove_file(&abs)
                    .await
                    .map_err(|err| FsError::from_io(&what, err))
            }
        })
        .await
    }

    async fn rename(
        &self,
        ctx: &OpContext,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let (from_clean, from_abs) = self.resolve(from)?;
        let (_, to_abs) = self.resolve(to)?;
        let what = format!("rename {from_clean}");
        ctx.bound(&what, async {
            fs::rename(&from_abs, &to_abs)
                .await
                .map_err(|err| FsError::from_io(&what, err))
        })
        .await
    }

    async fn exists(&self, ctx: &OpContext, path: &str) -> Result<bool> {
        let (clean, abs) = self.resolve(path)?;
        let what = format!("exists {clean}");
        ctx.bound(&what, async {
            match fs::symlink_metadata(&abs).await {
                Ok(_) => Ok(true),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    Ok(false)
                }
                Err(err) => Err(FsError::from_io(&what, err)),
            }
        })
        .await
    }

    async fn create_dir(&self, ctx: &OpContext, path: &str) -> Result<()> {
        let (clean, abs) = self.resolve(path)?;
        let what = format!("create_dir {clean}");
        ctx.bound(&what, async {
            fs::create_dir_all(&abs)
                .await
                .map_err(|err| FsError::from_io(&what, err))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn client_for(dir: &tempfile::TempDir) -> LocalClient {
        LocalClient::new(RootId::new(), dir.path())
    }

    #[tokio::test]
    async fn list_and_stat_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("season1")).unwrap();
        std::fs::write(dir.path().join("season1/ep1.mkv"), b"data").unwrap();

        let client = client_for(&dir);
        let ctx = OpContext::unbounded();

        let listing = client.list(&ctx, "").await.unwrap();
        assert!(!listing.is_stale());
        assert_eq!(listing.value.len(), 1);
        assert_eq!(listing.value[0].kind, FileKind::Directory);

        let stat = client.stat(&ctx, "season1/ep1.mkv").await.unwrap();
        assert_eq!(stat.value.size, 4);
        assert_eq!(stat.value.name, "ep1.mkv");
        assert!(stat.value.modified.is_some());
    }

    #[tokio::test]
    async fn open_reads_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let client = client_for(&dir);
        let ctx = OpContext::unbounded();

        let mut reader = client.open(&ctx, "a.txt").await.unwrap();
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"hello");
    }

    #[tokio::test]
    async fn write_delete_rename_exists() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&dir);
        let ctx = OpContext::unbounded();

        client.write(&ctx, "sub/new.txt", b"x").await.unwrap();
        assert!(client.exists(&ctx, "sub/new.txt").await.unwrap());

        client.rename(&ctx, "sub/new.txt", "sub/renamed.txt").await.unwrap();
        assert!(!client.exists(&ctx, "sub/new.txt").await.unwrap());

        client.delete(&ctx, "sub/renamed.txt").await.unwrap();
        assert!(!client.exists(&ctx, "sub/renamed.txt").await.unwrap());
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&dir);
        let ctx = OpContext::unbounded();

        let err = client.stat(&ctx, "nope").await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));

        let err = client.list(&ctx, "nope").await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&dir);
        let ctx = OpContext::unbounded();

        let err = client.stat(&ctx, "../outside").await.unwrap_err();
        assert!(matches!(err, FsError::Permanent(_)));
    }
}
