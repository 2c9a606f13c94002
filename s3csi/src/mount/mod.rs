//! Node-local mount handling.
//!
//! [`MountUtils`] is the seam between the mount protocol and the host: the
//! live mount table is the only record of what is staged or published, and
//! every probe goes back to it.

pub mod controller;
pub mod helper;
pub mod lock;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::mount::{MntFlags, MsFlags};
use thiserror::Error;
use tracing::debug;

pub use controller::MountController;
pub use helper::{FuseMounterFactory, Mounter, MounterFactory};
pub use lock::PathLocks;

/// Permissions for staging directories created by the plugin.
pub const STAGING_DIR_MODE: u32 = 0o750;

const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";

#[derive(Debug, Error)]
pub enum MountError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Listed in the mount table but unreachable, as a FUSE mount is once
    /// its helper has died.
    #[error("{} is a broken mount point: {source}", path.display())]
    Corrupted {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op} {}: {source}", path.display())]
    Syscall {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("{helper} failed: {reason}")]
    Helper { helper: String, reason: String },

    #[error("{} did not become a mount point within {secs}s", path.display())]
    Timeout { path: PathBuf, secs: u64 },

    #[error("{0}")]
    Config(String),
}

impl MountError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                op,
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Host operations the mount protocol depends on.
#[async_trait]
pub trait MountUtils: Send + Sync {
    /// Whether `path` is currently a mount point.  A missing path yields
    /// [`MountError::NotFound`]; a listed mount point that cannot be
    /// reached yields [`MountError::Corrupted`].
    async fn is_mount_point(&self, path: &Path) -> Result<bool, MountError>;

    async fn path_exists(&self, path: &Path) -> Result<bool, MountError>;

    /// Create `path` and any missing parents with `mode`.
    async fn make_dir(&self, path: &Path, mode: u32) -> Result<(), MountError>;

    /// Create an empty file at `path` (and its parents) unless present.
    async fn make_file(&self, path: &Path) -> Result<(), MountError>;

    async fn bind_mount(&self, source: &Path, target: &Path, read_only: bool)
    -> Result<(), MountError>;

    async fn unmount(&self, path: &Path) -> Result<(), MountError>;

    /// Remove an unmounted file or empty directory; a missing path is fine.
    async fn remove_path(&self, path: &Path) -> Result<(), MountError>;
}

/// [`MountUtils`] backed by the running kernel.
#[derive(Debug, Clone)]
pub struct HostMountUtils {
    mountinfo: PathBuf,
}

impl Default for HostMountUtils {
    fn default() -> Self {
        Self {
            mountinfo: PathBuf::from(PROC_MOUNTINFO),
        }
    }
}

impl HostMountUtils {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read mount points from `mountinfo` instead of the process table.
    pub fn with_mountinfo(mountinfo: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo: mountinfo.into(),
        }
    }

    async fn listed(&self, path: &Path) -> Result<bool, MountError> {
        let table = tokio::fs::read_to_string(&self.mountinfo)
            .await
            .map_err(|e| MountError::Io {
                op: "read",
                path: self.mountinfo.clone(),
                source: e,
            })?;
        Ok(mount_points(&table).any(|mp| Path::new(&mp) == path))
    }
}

#[async_trait]
impl MountUtils for HostMountUtils {
    async fn is_mount_point(&self, path: &Path) -> Result<bool, MountError> {
        let error = match tokio::fs::canonicalize(path).await {
            Ok(resolved) => return self.listed(&resolved).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MountError::NotFound(path.to_path_buf()));
            }
            Err(e) => e,
        };

        // stat on a dead FUSE mount fails with ENOTCONN, EIO or ESTALE, so
        // fall back to the path as written.
        let lexical =
            std::path::absolute(path).map_err(|e| MountError::io("resolve", path, e))?;
        if self.listed(&lexical).await? {
            Err(MountError::Corrupted {
                path: path.to_path_buf(),
                source: error,
            })
        } else {
            Err(MountError::io("resolve", path, error))
        }
    }

    async fn path_exists(&self, path: &Path) -> Result<bool, MountError> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MountError::io("stat", path, e)),
        }
    }

    async fn make_dir(&self, path: &Path, mode: u32) -> Result<(), MountError> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true).mode(mode);
        builder
            .create(path)
            .await
            .map_err(|e| MountError::io("mkdir", path, e))
    }

    async fn make_file(&self, path: &Path) -> Result<(), MountError> {
        if let Some(parent) = path.parent() {
            self.make_dir(parent, STAGING_DIR_MODE).await?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .await
            .map(drop)
            .map_err(|e| MountError::io("create", path, e))
    }

    async fn bind_mount(
        &self,
        source: &Path,
        target: &Path,
        read_only: bool,
    ) -> Result<(), MountError> {
        let source = source.to_path_buf();
        let target = target.to_path_buf();
        run_blocking(target.clone(), move || {
            nix::mount::mount(
                Some(source.as_path()),
                target.as_path(),
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )
            .map_err(|e| MountError::Syscall {
                op: "bind mount",
                path: target.clone(),
                source: e,
            })?;

            // MS_RDONLY is ignored on the initial bind; it takes a remount.
            if read_only {
                nix::mount::mount(
                    None::<&str>,
                    target.as_path(),
                    None::<&str>,
                    MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                    None::<&str>,
                )
                .map_err(|e| MountError::Syscall {
                    op: "remount read-only",
                    path: target.clone(),
                    source: e,
                })?;
            }
            Ok(())
        })
        .await
    }

    async fn unmount(&self, path: &Path) -> Result<(), MountError> {
        let target = path.to_path_buf();
        run_blocking(target.clone(), move || {
            nix::mount::umount2(target.as_path(), MntFlags::empty()).map_err(|e| {
                MountError::Syscall {
                    op: "umount",
                    path: target.clone(),
                    source: e,
                }
            })
        })
        .await
    }

    async fn remove_path(&self, path: &Path) -> Result<(), MountError> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(MountError::io("stat", path, e)),
        };
        let removed = if meta.is_dir() {
            tokio::fs::remove_dir(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        match removed {
            Ok(()) => {
                debug!(path = %path.display(), "removed mount target");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MountError::io("remove", path, e)),
        }
    }
}

async fn run_blocking<F>(path: PathBuf, f: F) -> Result<(), MountError>
where
    F: FnOnce() -> Result<(), MountError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MountError::Io {
            op: "join",
            path,
            source: io::Error::other(e),
        })?
}

/// Mount points listed in a mountinfo table, with octal escapes decoded.
///
/// Line format: `id parent major:minor root mount-point options ...`.
fn mount_points(table: &str) -> impl Iterator<Item = String> + '_ {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(unescape_octal)
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(digits) = bytes.get(i + 1..i + 4)
            && digits.iter().all(|d| (b'0'..=b'7').contains(d))
        {
            out.push(
                digits
                    .iter()
                    .fold(0u8, |acc, d| acc.wrapping_mul(8).wrapping_add(d - b'0')),
            );
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
