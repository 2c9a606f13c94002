//! In-memory stand-ins for the host and the object store.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use libcsi::{CapabilitySet, StringMap, VolumeId};
use parking_lot::Mutex;

use crate::mount::helper::{Mounter, MounterFactory};
use crate::mount::{MountError, MountUtils};
use crate::s3::{ClientFactory, ObjectStore, S3Config, S3Error, StorageClient};
use crate::stats::{FsStats, StatsError, StatsUtils};

pub fn secrets() -> StringMap {
    [
        ("accessKeyID", "AKID"),
        ("secretAccessKey", "SECRET"),
        ("endpoint", "http://minio:9000"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect()
}

pub fn single_writer_caps() -> CapabilitySet {
    crate::driver::capabilities()
}

#[derive(Default)]
struct MountTable {
    existing: HashSet<PathBuf>,
    mounted: HashSet<PathBuf>,
    calls: Vec<String>,
    failing_probe: HashSet<PathBuf>,
}

/// Mount table kept in memory; every call is recorded.
#[derive(Default)]
pub struct FakeMountUtils {
    table: Mutex<MountTable>,
    fail_bind: AtomicBool,
}

impl FakeMountUtils {
    pub fn calls(&self) -> Vec<String> {
        self.table.lock().calls.clone()
    }

    pub fn is_mounted(&self, path: &str) -> bool {
        self.table.lock().mounted.contains(Path::new(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.table.lock().existing.contains(Path::new(path))
    }

    pub fn add_path(&self, path: &str) {
        self.table.lock().existing.insert(PathBuf::from(path));
    }

    /// Make stat on `path` fail; a mounted `path` then reads as a broken
    /// mount.
    pub fn fail_probe(&self, path: &str) {
        let mut table = self.table.lock();
        table.existing.insert(PathBuf::from(path));
        table.failing_probe.insert(PathBuf::from(path));
    }

    pub fn fail_bind(&self) {
        self.fail_bind.store(true, Ordering::SeqCst);
    }

    /// Mark `path` mounted, as a helper would.
    pub fn mount(&self, path: &Path) {
        let mut table = self.table.lock();
        table.existing.insert(path.to_path_buf());
        table.mounted.insert(path.to_path_buf());
    }
}

#[async_trait]
impl MountUtils for FakeMountUtils {
    async fn is_mount_point(&self, path: &Path) -> Result<bool, MountError> {
        let mut table = self.table.lock();
        table.calls.push(format!("probe {}", path.display()));
        if table.failing_probe.contains(path) {
            // ENOTCONN, as stat reports on a FUSE mount whose helper died.
            let source = io::Error::from_raw_os_error(107);
            let path = path.to_path_buf();
            return Err(if table.mounted.contains(&path) {
                MountError::Corrupted { path, source }
            } else {
                MountError::Io {
                    op: "stat",
                    path,
                    source,
                }
            });
        }
        if !table.existing.contains(path) {
            return Err(MountError::NotFound(path.to_path_buf()));
        }
        Ok(table.mounted.contains(path))
    }

    async fn path_exists(&self, path: &Path) -> Result<bool, MountError> {
        let mut table = self.table.lock();
        table.calls.push(format!("exists {}", path.display()));
        Ok(table.existing.contains(path))
    }

    async fn make_dir(&self, path: &Path, mode: u32) -> Result<(), MountError> {
        let mut table = self.table.lock();
        table.calls.push(format!("make_dir {} {mode:o}", path.display()));
        table.existing.insert(path.to_path_buf());
        Ok(())
    }

    async fn make_file(&self, path: &Path) -> Result<(), MountError> {
        let mut table = self.table.lock();
        table.calls.push(format!("make_file {}", path.display()));
        table.existing.insert(path.to_path_buf());
        Ok(())
    }

    async fn bind_mount(
        &self,
        source: &Path,
        target: &Path,
        read_only: bool,
    ) -> Result<(), MountError> {
        let mut table = self.table.lock();
        table.calls.push(format!(
            "bind_mount {} {} {}",
            source.display(),
            target.display(),
            if read_only { "ro" } else { "rw" }
        ));
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(MountError::Io {
                op: "bind mount",
                path: target.to_path_buf(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        table.mounted.insert(target.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, path: &Path) -> Result<(), MountError> {
        let mut table = self.table.lock();
        table.calls.push(format!("unmount {}", path.display()));
        table.mounted.remove(path);
        table.failing_probe.remove(path);
        Ok(())
    }

    async fn remove_path(&self, path: &Path) -> Result<(), MountError> {
        let mut table = self.table.lock();
        table.calls.push(format!("remove {}", path.display()));
        table.existing.remove(path);
        Ok(())
    }
}

#[derive(Default)]
struct MounterLog {
    buckets: Vec<String>,
    staged: Vec<(String, PathBuf)>,
}

/// Mounter factory whose mounters flip paths to mounted in a
/// [`FakeMountUtils`].
pub struct FakeMounters {
    utils: Arc<FakeMountUtils>,
    log: Arc<Mutex<MounterLog>>,
    fail_next: Arc<AtomicBool>,
}

impl FakeMounters {
    pub fn new(utils: Arc<FakeMountUtils>) -> Self {
        Self {
            utils,
            log: Arc::default(),
            fail_next: Arc::default(),
        }
    }

    pub fn buckets(&self) -> Vec<String> {
        self.log.lock().buckets.clone()
    }

    /// `(volume id, staging path)` per completed mount.
    pub fn staged(&self) -> Vec<(String, PathBuf)> {
        self.log.lock().staged.clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl MounterFactory for FakeMounters {
    fn new_mounter(
        &self,
        bucket: &str,
        _config: &S3Config,
        volume_id: &VolumeId,
    ) -> Result<Box<dyn Mounter>, MountError> {
        self.log.lock().buckets.push(bucket.to_owned());
        Ok(Box::new(FakeMounter {
            volume_id: volume_id.to_string(),
            utils: Arc::clone(&self.utils),
            log: Arc::clone(&self.log),
            fail: self.fail_next.swap(false, Ordering::SeqCst),
        }))
    }
}

struct FakeMounter {
    volume_id: String,
    utils: Arc<FakeMountUtils>,
    log: Arc<Mutex<MounterLog>>,
    fail: bool,
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn stage(&self, staging_path: &Path) -> Result<(), MountError> {
        if self.fail {
            return Err(MountError::Helper {
                helper: "fake".into(),
                reason: "exit status: 1".into(),
            });
        }
        self.utils.mount(staging_path);
        self.log
            .lock()
            .staged
            .push((self.volume_id.clone(), staging_path.to_path_buf()));
        Ok(())
    }
}

/// Bucket set kept in memory; buckets made through the store are marked
/// as owned.
#[derive(Default)]
pub struct FakeStore {
    buckets: Mutex<HashSet<String>>,
    owned: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn with_buckets<'a>(buckets: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            buckets: Mutex::new(buckets.into_iter().map(str::to_owned).collect()),
            owned: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().contains(bucket)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, S3Error> {
        self.calls.lock().push(format!("exists {bucket}"));
        Ok(self.buckets.lock().contains(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        self.calls.lock().push(format!("create {bucket}"));
        self.buckets.lock().insert(bucket.to_owned());
        self.owned.lock().insert(bucket.to_owned());
        Ok(())
    }

    async fn owns_bucket(&self, bucket: &str) -> Result<bool, S3Error> {
        self.calls.lock().push(format!("owns {bucket}"));
        Ok(self.owned.lock().contains(bucket))
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        self.calls.lock().push(format!("remove {bucket}"));
        self.buckets.lock().remove(bucket);
        self.owned.lock().remove(bucket);
        Ok(())
    }
}

/// Parses secrets for real and hands out one shared [`FakeStore`].
#[derive(Default)]
pub struct FakeClients {
    pub store: Arc<FakeStore>,
}

impl FakeClients {
    pub fn new(store: Arc<FakeStore>) -> Self {
        Self { store }
    }
}

impl ClientFactory for FakeClients {
    fn from_secrets(&self, secrets: &StringMap) -> Result<StorageClient, S3Error> {
        Ok(StorageClient {
            config: S3Config::from_secrets(secrets)?,
            store: self.store.clone(),
        })
    }
}

enum StatsMode {
    Block(u64),
    Filesystem(FsStats),
    FailingProbe,
    FailingSize,
}

pub struct FakeStats {
    mode: StatsMode,
}

impl FakeStats {
    pub fn block(size: u64) -> Self {
        Self {
            mode: StatsMode::Block(size),
        }
    }

    pub fn filesystem(stats: FsStats) -> Self {
        Self {
            mode: StatsMode::Filesystem(stats),
        }
    }

    pub fn failing_probe() -> Self {
        Self {
            mode: StatsMode::FailingProbe,
        }
    }

    pub fn failing_size() -> Self {
        Self {
            mode: StatsMode::FailingSize,
        }
    }

    fn error(op: &'static str, path: &Path) -> StatsError {
        StatsError::Syscall {
            op,
            path: path.to_path_buf(),
            source: nix::Error::ENOENT,
        }
    }
}

#[async_trait]
impl StatsUtils for FakeStats {
    async fn is_block_device(&self, path: &Path) -> Result<bool, StatsError> {
        match self.mode {
            StatsMode::FailingProbe => Err(Self::error("stat", path)),
            StatsMode::Block(_) | StatsMode::FailingSize => Ok(true),
            StatsMode::Filesystem(_) => Ok(false),
        }
    }

    async fn device_size(&self, path: &Path) -> Result<u64, StatsError> {
        match self.mode {
            StatsMode::Block(size) => Ok(size),
            _ => Err(Self::error("seek", path)),
        }
    }

    async fn fs_stats(&self, path: &Path) -> Result<FsStats, StatsError> {
        match self.mode {
            StatsMode::Filesystem(stats) => Ok(stats),
            _ => Err(Self::error("statvfs", path)),
        }
    }
}
