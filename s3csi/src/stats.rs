//! Capacity and usage reporting for staged or published volumes.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use libcsi::{CsiError, NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, UsageUnit, VolumeUsage};
use nix::sys::stat::SFlag;
use thiserror::Error;
use tokio::io::AsyncSeekExt;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
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
}

/// Filesystem usage in bytes and inodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    pub available_bytes: u64,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub used_inodes: u64,
}

/// Host queries behind [`VolumeStatsProbe`].
#[async_trait]
pub trait StatsUtils: Send + Sync {
    async fn is_block_device(&self, path: &Path) -> Result<bool, StatsError>;

    async fn device_size(&self, path: &Path) -> Result<u64, StatsError>;

    async fn fs_stats(&self, path: &Path) -> Result<FsStats, StatsError>;
}

#[derive(Debug, Default, Clone)]
pub struct HostStatsUtils;

#[async_trait]
impl StatsUtils for HostStatsUtils {
    async fn is_block_device(&self, path: &Path) -> Result<bool, StatsError> {
        let owned = path.to_path_buf();
        let st = blocking("stat", path, move || nix::sys::stat::stat(owned.as_path())).await?;
        let kind = SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT;
        Ok(kind == SFlag::S_IFBLK)
    }

    async fn device_size(&self, path: &Path) -> Result<u64, StatsError> {
        let io_err = |op, source| StatsError::Io {
            op,
            path: path.to_path_buf(),
            source,
        };
        let mut device = tokio::fs::File::open(path)
            .await
            .map_err(|e| io_err("open", e))?;
        device
            .seek(SeekFrom::End(0))
            .await
            .map_err(|e| io_err("seek", e))
    }

    async fn fs_stats(&self, path: &Path) -> Result<FsStats, StatsError> {
        let owned = path.to_path_buf();
        let vfs = blocking("statvfs", path, move || {
            nix::sys::statvfs::statvfs(owned.as_path())
        })
        .await?;
        let frsize = vfs.fragment_size() as u64;
        let blocks = vfs.blocks() as u64;
        let files = vfs.files() as u64;
        let files_free = vfs.files_free() as u64;
        Ok(FsStats {
            available_bytes: vfs.blocks_available() as u64 * frsize,
            total_bytes: blocks * frsize,
            used_bytes: blocks.saturating_sub(vfs.blocks_free() as u64) * frsize,
            total_inodes: files,
            free_inodes: files_free,
            used_inodes: files.saturating_sub(files_free),
        })
    }
}

/// Run a syscall on the blocking pool.
async fn blocking<T, F>(op: &'static str, path: &Path, f: F) -> Result<T, StatsError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, nix::Error> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|source| StatsError::Syscall {
            op,
            path: path.to_path_buf(),
            source,
        }),
        Err(e) => Err(StatsError::Io {
            op,
            path: path.to_path_buf(),
            source: io::Error::other(e),
        }),
    }
}

/// Answers `NodeGetVolumeStats`.
pub struct VolumeStatsProbe {
    utils: Arc<dyn StatsUtils>,
}

impl VolumeStatsProbe {
    pub fn new(utils: Arc<dyn StatsUtils>) -> Self {
        Self { utils }
    }

    /// Block volumes report a single byte total; filesystems report bytes
    /// and inodes.
    #[instrument(skip_all, fields(volume_id = %req.volume_id, path = %req.volume_path))]
    pub async fn stats(
        &self,
        req: &NodeGetVolumeStatsRequest,
    ) -> Result<NodeGetVolumeStatsResponse, CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::invalid_argument("Volume ID missing in request"));
        }
        if req.volume_path.is_empty() {
            return Err(CsiError::invalid_argument("Volume path missing in request"));
        }
        let path = Path::new(&req.volume_path);

        let is_block = self.utils.is_block_device(path).await.map_err(|e| {
            CsiError::Internal(format!("failed to determine if volume is block: {e}"))
        })?;

        if is_block {
            let size = self.utils.device_size(path).await.map_err(|e| {
                CsiError::Internal(format!("failed to get size of block volume: {e}"))
            })?;
            return Ok(NodeGetVolumeStatsResponse {
                usage: vec![VolumeUsage {
                    total: size,
                    unit: UsageUnit::Bytes,
                    ..Default::default()
                }],
            });
        }

        let fs = self.utils.fs_stats(path).await.map_err(|e| {
            CsiError::Internal(format!("failed to get filesystem stats: {e}"))
        })?;
        Ok(NodeGetVolumeStatsResponse {
            usage: vec![
                VolumeUsage {
                    available: fs.available_bytes,
                    total: fs.total_bytes,
                    used: fs.used_bytes,
                    unit: UsageUnit::Bytes,
                },
                VolumeUsage {
                    available: fs.free_inodes,
                    total: fs.total_inodes,
                    used: fs.used_inodes,
                    unit: UsageUnit::Inodes,
                },
            ],
        })
    }
}
