//! Kernel mount lifecycle for NFS and SMB roots.
//!
//! Both protocols attach the remote tree to a local mount point and then
//! work through the VFS; this module owns spawning `mount`/`umount` and
//! verifying state against `/proc/mounts`.

use std::path::Path;
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::context::OpContext;
use crate::error::{FsError, Result};

const MOUNT_TABLE: &str = "/proc/mounts";

/// Everything needed to attach one remote filesystem.
#[derive(Clone)]
pub(crate) struct MountSpec {
    /// `host:/export` for NFS, `//host/share` for SMB.
    pub source: String,
    pub mount_point: std::path::PathBuf,
    pub fstype: &'static str,
    /// Comma-separated `-o` options.
    pub options: String,
    /// Extra environment for the mount helper (`PASSWD` for mount.cifs, so
    /// the credential stays off the command line).
    pub env: Vec<(String, String)>,
}

impl std::fmt::Debug for MountSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_keys: Vec<&str> =
            self.env.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("MountSpec")
            .field("source", &self.source)
            .field("mount_point", &self.mount_point)
            .field("fstype", &self.fstype)
            .field("options", &self.options)
            .field("env", &env_keys)
            .finish()
    }
}

/// Whether `mount_point` currently appears in the kernel mount table.
pub(crate) async fn is_mounted(mount_point: &Path) -> Result<bool> {
    let table = tokio::fs::read_to_string(MOUNT_TABLE)
        .await
        .map_err(|err| FsError::from_io(MOUNT_TABLE, err))?;
    let needle = mount_table_escape(&mount_point.display().to_string());
    Ok(table
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(needle.as_str())))
}

/// Attach the filesystem if it is not already mounted. Safe to call before
/// every operation; the mounted case is one small file read.
pub(crate) async fn ensure_mounted(
    ctx: &OpContext,
    spec: &MountSpec,
) -> Result<()> {
    if is_mounted(&spec.mount_point).await? {
        return Ok(());
    }

    tokio::fs::create_dir_all(&spec.mount_point)
        .await
        .map_err(|err| {
            FsError::from_io(
                &format!("create mount point {}", spec.mount_point.display()),
                err,
            )
        })?;

    let what = format!("mount {} at {}", spec.source, spec.mount_point.display());
    debug!(source = %spec.source, mount_point = %spec.mount_point.display(), "mounting");

    let mut command = Command::new("mount");
    command
        .arg("-t")
        .arg(spec.fstype)
        .arg("-o")
        .arg(&spec.options)
        .arg(&spec.source)
        .arg(&spec.mount_point);
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let output = ctx
        .bound(&what, async {
            command
                .output()
                .await
                .map_err(|err| FsError::from_io(&what, err))
        })
        .await?;

    if !output.status.success() {
        return Err(classify_mount_failure(&what, &output));
    }

    // mount(8) can exit zero while a helper backgrounds and fails.
    if !is_mounted(&spec.mount_point).await? {
        return Err(FsError::Transient(format!(
            "{what}: mount reported success but {} is absent from {MOUNT_TABLE}",
            spec.mount_point.display()
        )));
    }

    info!(source = %spec.source, mount_point = %spec.mount_point.display(), fstype = spec.fstype, "mounted");
    Ok(())
}

/// Detach the filesystem. A mount point that is already gone is fine.
pub(crate) async fn unmount(mount_point: &Path) -> Result<()> {
    if !is_mounted(mount_point).await? {
        return Ok(());
    }
    let what = format!("umount {}", mount_point.display());
    let output = Command::new("umount")
        .arg(mount_point)
        .output()
        .await
        .map_err(|err| FsError::from_io(&what, err))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(mount_point = %mount_point.display(), error = %stderr.trim(), "unmount failed");
        return Err(FsError::Transient(format!("{what}: {}", stderr.trim())));
    }
    info!(mount_point = %mount_point.display(), "unmounted");
    Ok(())
}

/// Auth failures are permanent; everything else (server down, timeout,
/// helper missing) gets retried.
fn classify_mount_failure(what: &str, output: &Output) -> FsError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    let lowered = detail.to_ascii_lowercase();
    let denied = [
        "permission denied",
        "access denied",
        "logon failure",
        "authentication",
        "bad username",
        "invalid argument",
    ];
    if denied.iter().any(|marker| lowered.contains(marker)) {
        FsError::Permanent(format!("{what}: {detail}"))
    } else {
        FsError::Transient(format!("{what}: {detail}"))
    }
}

/// `/proc/mounts` escapes whitespace octally in mount points.
fn mount_table_escape(path: &str) -> String {
    path.replace(' ', "\\040").replace('\t', "\\011")
}
