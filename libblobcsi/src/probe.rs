//! Mount-point inspection and kernel mount calls.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::mount::MsFlags;
use tracing::debug;

/// Host filesystem operations used by the node plugin.
#[async_trait]
pub trait FileSystemProbe: Send + Sync {
    /// Whether `path` is a mount point. A missing path is `Ok(false)`.
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool>;

    async fn unmount(&self, path: &Path) -> io::Result<()>;

    /// Whether the mount at `path` can still be listed.
    async fn path_healthy(&self, path: &Path) -> bool;

    async fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()>;

    async fn mount_nfs(&self, source: &str, target: &Path, options: &[String]) -> io::Result<()>;
}

/// Whether a stat error means a broken mount rather than a missing path.
pub fn is_corrupted_mount_error(err: &io::Error) -> bool {
    let Some(code) = err.raw_os_error() else {
        return false;
    };
    [
        Errno::ENOTCONN,
        Errno::ESTALE,
        Errno::EIO,
        Errno::EHOSTDOWN,
        Errno::ECONNREFUSED,
        Errno::EACCES,
    ]
    .iter()
    .any(|errno| *errno as i32 == code)
}

/// [`FileSystemProbe`] backed by the running kernel.
#[derive(Debug, Default)]
pub struct HostProbe;

impl HostProbe {
    pub fn new() -> Self {
        Self
    }
}

/// Return `true` if `path` is listed in `/proc/self/mounts`.
///
/// `/proc/self/mounts` uses octal escapes (`\040` for space). Target paths
/// handed to the plugin never contain whitespace.
async fn listed_in_mount_table(path: &Path) -> bool {
    let Some(path) = path.to_str() else {
        return false;
    };
    let contents = match tokio::fs::read_to_string("/proc/self/mounts").await {
        Ok(c) => c,
        Err(_) => return false,
    };
    // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
    contents
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(path))
}

#[async_trait]
impl FileSystemProbe for HostProbe {
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if let Some(parent) = path.parent()
            && let Ok(parent_meta) = tokio::fs::metadata(parent).await
            && parent_meta.dev() != meta.dev()
        {
            return Ok(true);
        }
        // Bind mounts share the parent's device.
        Ok(listed_in_mount_table(path).await)
    }

    async fn unmount(&self, path: &Path) -> io::Result<()> {
        debug!(path = %path.display(), "unmounting");
        nix::mount::umount(path).map_err(io::Error::from)
    }

    async fn path_healthy(&self, path: &Path) -> bool {
        match tokio::fs::read_dir(path).await {
            Ok(mut entries) => entries.next_entry().await.is_ok(),
            Err(_) => false,
        }
    }

    async fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()> {
        let mut flags = MsFlags::MS_BIND;
        if read_only {
            flags |= MsFlags::MS_RDONLY;
        }
        nix::mount::mount(Some(source), target, None::<&str>, flags, None::<&str>)?;

        // Some kernels ignore MS_RDONLY on the initial bind; remount to
        // enforce it.
        if read_only {
            nix::mount::mount(
                None::<&str>,
                target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )?;
        }
        Ok(())
    }

    async fn mount_nfs(&self, source: &str, target: &Path, options: &[String]) -> io::Result<()> {
        let mut cmd = tokio::process::Command::new("mount");
        cmd.args(["-t", "nfs"]);
        if !options.is_empty() {
            cmd.arg("-o").arg(options.join(","));
        }
        cmd.arg(source).arg(target);

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "mount -t nfs {source} {}: {}: {}",
                target.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
