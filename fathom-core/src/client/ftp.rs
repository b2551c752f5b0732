//! FTP storage via `suppaftp`.
//!
//! The library speaks blocking FTP, so every operation opens a fresh
//! control connection inside `spawn_blocking`, does its work, and quits.
//! That is slower than a pooled session but immune to half-dead control
//! channels, which plague long-lived FTP connections to consumer NAS boxes.

use std::io::Cursor;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use suppaftp::FtpStream;
use suppaftp::list::File as FtpListEntry;
use suppaftp::types::FileType;
use tracing::debug;

use fathom_config::Secret;
use fathom_model::{FileKind, FileRecord, Protocol, RootId, Sourced};

use crate::client::{FileReader, StorageClient, clean_relative, join_rel, parent_of};
use crate::context::OpContext;
use crate::error::{FsError, Result};

#[derive(Debug, Clone)]
pub struct FtpClient {
    root_id: RootId,
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<Secret>,
    /// Server-side base directory, empty for the login directory.
    base: String,
}

impl FtpClient {
    pub fn new(
        root_id: RootId,
        host: &str,
        port: u16,
        username: Option<String>,
        password: Option<Secret>,
        base: &str,
    ) -> Self {
        FtpClient {
            root_id,
            host: host.to_string(),
            port,
            username,
            password,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn full_path(&self, path: &str) -> Result<String> {
        let clean = clean_relative(path)?;
        Ok(match (self.base.is_empty(), clean.is_empty()) {
            (true, _) => clean,
            (false, true) => self.base.clone(),
            (false, false) => format!("{}/{clean}", self.base),
        })
    }

    /// Run one blocking FTP exchange on its own connection.
    async fn with_conn<T, F>(
        &self,
        ctx: &OpContext,
        what: &str,
        op: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> suppaftp::FtpResult<T> + Send + 'static,
    {
        let addr = format!("{}:{}", self.host, self.port);
        let username = self
            .username
            .clone()
            .filter(|user| !user.is_empty())
            .unwrap_or_else(|| "anonymous".to_string());
        let password = self
            .password
            .as_ref()
            .map(|secret| secret.expose().to_string())
            .unwrap_or_else(|| "anonymous@".to_string());
        let context = what.to_string();

        ctx.bound(what, async move {
            let task = tokio::task::spawn_blocking(move || {
                let mut ftp = FtpStream::connect(&addr)
                    .map_err(|err| classify_ftp(&context, &err))?;
                let outcome = (|| {
                    ftp.login(&username, &password)?;
                    ftp.transfer_type(FileType::Binary)?;
                    op(&mut ftp)
                })();
                // Best-effort goodbye; the result above is what matters.
                let _ = ftp.quit();
                outcome.map_err(|err| classify_ftp(&context, &err))
            });
            task.await.map_err(|err| {
                FsError::Internal(format!("ftp worker panicked: {err}"))
            })?
        })
        .await
    }

    fn record_from_entry(
        &self,
        dir: &str,
        entry: &FtpListEntry,
    ) -> FileRecord {
        let kind = if entry.is_directory() {
            FileKind::Directory
        } else if entry.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::File
        };
        let mut record =
            FileRecord::new(self.root_id, join_rel(dir, entry.name()), kind);
        record.size = entry.size() as u64;
        record.modified = system_time_to_utc(entry.modified());
        record
    }

    async fn list_entries(
        &self,
        ctx: &OpContext,
        clean_dir: &str,
    ) -> Result<Vec<FileRecord>> {
        let full = self.full_path(clean_dir)?;
        let what = format!("list {clean_dir}");
        let lines = self
            .with_conn(ctx, &what, move |ftp| {
                ftp.list(if full.is_empty() {
                    None
                } else {
                    Some(full.as_str())
                })
            })
            .await?;

        let mut records = Vec::with_capacity(lines.len());
        for line in &lines {
            match FtpListEntry::try_from(line.as_str()) {
                Ok(entry) => {
                    if entry.name() == "." || entry.name() == ".." {
                        continue;
                    }
                    records.push(self.record_from_entry(clean_dir, &entry));
                }
                Err(err) => {
                    debug!(line, error = %err, "skipping unparseable LIST line");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl StorageClient for FtpClient {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn root_id(&self) -> RootId {
        self.root_id
    }

    async fn probe(&self, ctx: &OpContext) -> Result<()> {
        self.with_conn(ctx, "probe", |ftp| ftp.pwd().map(|_| ()))
            .await
    }

    async fn list(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<Vec<FileRecord>>> {
        let clean = clean_relative(path)?;
        Ok(Sourced::live(self.list_entries(ctx, &clean).await?))
    }

    async fn stat(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<FileRecord>> {
        let clean = clean_relative(path)?;
        if clean.is_empty() {
            return Ok(Sourced::live(FileRecord::new(
                self.root_id,
                clean,
                FileKind::Directory,
            )));
        }
        let Some(parent) = parent_of(&clean) else {
            return Err(FsError::Internal(format!(
                "no parent for non-root path {clean}"
            )));
        };
        let siblings = self.list_entries(ctx, &parent).await?;
        siblings
            .into_iter()
            .find(|record| record.path == clean)
            .map(Sourced::live)
            .ok_or_else(|| FsError::NotFound(format!("stat {clean}")))
    }

    async fn open(&self, ctx: &OpContext, path: &str) -> Result<FileReader> {
        let clean = clean_relative(path)?;
        let full = self.full_path(&clean)?;
        let what = format!("open {clean}");
        let buffer = self
            .with_conn(ctx, &what, move |ftp| ftp.retr_as_buffer(&full))
            .await?;
        Ok(Box::new(buffer) as FileReader)
    }

    async fn write(
        &self,
        ctx: &OpContext,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        let clean = clean_relative(path)?;
        let full = self.full_path(&clean)?;
        let what = format!("write {clean}");
        let payload = data.to_vec();
        self.with_conn(ctx, &what, move |ftp| {
            let mut reader = Cursor::new(payload);
            ftp.put_file(&full, &mut reader).map(|_| ())
        })
        .await
    }

    async fn delete(&self, ctx: &OpContext, path: &str) -> Result<()> {
        let clean = clean_relative(path)?;
        let full = self.full_path(&clean)?;
        let what = format!("delete {clean}");
        self.with_conn(ctx, &what, move |ftp| {
            // DELE only works on files; fall back to RMD for directories.
            ftp.rm(&full).or_else(|_| ftp.rmdir(&full))
        })
        .await
    }

    async fn rename(
        &self,
        ctx: &OpContext,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let from_clean = clean_relative(from)?;
        let from_full = self.full_path(&from_clean)?;
        let to_full = self.full_path(&clean_relative(to)?)?;
        let what = format!("rename {from_clean}");
        self.with_conn(ctx, &what, move |ftp| {
            ftp.rename(&from_full, &to_full)
        })
        .await
    }

    async fn exists(&self, ctx: &OpContext, path: &str) -> Result<bool> {
        match self.stat(ctx, path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_dir(&self, ctx: &OpContext, path: &str) -> Result<()> {
        let clean = clean_relative(path)?;
        if clean.is_empty() {
            return Ok(());
        }
        let what = format!("create_dir {clean}");
        let base = self.base.clone();
        let segments: Vec<String> =
            clean.split('/').map(str::to_string).collect();
        self.with_conn(ctx, &what, move |ftp| {
            let mut current = base;
            for segment in segments {
                current = if current.is_empty() {
                    segment
                } else {
                    format!("{current}/{segment}")
                };
                // Exists already is fine; a real failure surfaces below.
                let _ = ftp.mkdir(&current);
            }
            ftp.cwd(&current).map(|_| ())
        })
        .await
    }
}

fn system_time_to_utc(time: SystemTime) -> Option<DateTime<Utc>> {
    // The parser yields UNIX_EPOCH when the listing had no usable date.
    if time == SystemTime::UNIX_EPOCH {
        None
    } else {
        Some(DateTime::<Utc>::from(time))
    }
}

/// Map an FTP failure into the shared taxonomy. Reply codes follow RFC 959:
/// 4xx are transient negatives, 5xx permanent, with 550/553 meaning the
/// path does not exist. Connection-level errors carry no code and are
/// treated as transient.
fn classify_ftp(what: &str, err: &suppaftp::FtpError) -> FsError {
    let msg = err.to_string();
    match embedded_reply_code(&msg) {
        Some(550) | Some(553) => FsError::NotFound(format!("{what}: {msg}")),
        Some(code) if (400..500).contains(&code) => {
            FsError::Transient(format!("{what}: {msg}"))
        }
        Some(code) if (500..600).contains(&code) => {
            FsError::Permanent(format!("{what}: {msg}"))
        }
        _ => FsError::Transient(format!("{what}: {msg}")),
    }
}

/// First standalone three-digit number in 100..=599 within the message.
fn embedded_reply_code(msg: &str) -> Option<u16> {
    let bytes = msg.as_bytes();
    for (i, window) in bytes.windows(3).enumerate() {
        if !window.iter().all(|byte| byte.is_ascii_digit()) {
            continue;
        }
        let bounded_left = i == 0 || !bytes[i - 1].is_ascii_digit();
        let bounded_right =
            i + 3 >= bytes.len() || !bytes[i + 3].is_ascii_digit();
        if !bounded_left || !bounded_right {
            continue;
        }
        let code = u16::from(window[0] - b'0') * 100
            + u16::from(window[1] - b'0') * 10
            + u16::from(window[2] - b'0');
        if (100..=599).contains(&code) {
            return Some(code);
        }
    }
    None
}
