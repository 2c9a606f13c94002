//! Drives the whole plugin through the socket transport with the host
//! replaced by in-memory fakes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libcsi::{
    AccessMode, Code, CreateVolumeRequest, CsiClient, CsiError, CsiMessage, Endpoint,
    NodeExpandVolumeRequest, NodeGetVolumeStatsRequest, NodePublishVolumeRequest,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, StringMap,
    UsageUnit, VolumeCapability, VolumeId,
};
use parking_lot::Mutex;
use s3csi::mount::{MountError, MountUtils, Mounter, MounterFactory};
use s3csi::s3::{ClientFactory, ObjectStore, S3Config, S3Error, StorageClient};
use s3csi::stats::{FsStats, StatsError, StatsUtils};
use s3csi::{NodeUtils, S3Driver};
use tokio::sync::Notify;

#[derive(Default)]
struct Table {
    existing: HashSet<PathBuf>,
    mounted: HashSet<PathBuf>,
    helper_mounts: usize,
}

#[derive(Default)]
struct Host {
    table: Mutex<Table>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl Host {
    fn mounted(&self, path: &str) -> bool {
        self.table.lock().mounted.contains(Path::new(path))
    }

    fn helper_mounts(&self) -> usize {
        self.table.lock().helper_mounts
    }

    /// Make the next helper mount wait until the returned notify fires.
    fn hold_next_mount(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl MountUtils for Host {
    async fn is_mount_point(&self, path: &Path) -> Result<bool, MountError> {
        let table = self.table.lock();
        if !table.existing.contains(path) {
            return Err(MountError::NotFound(path.to_path_buf()));
        }
        Ok(table.mounted.contains(path))
    }

    async fn path_exists(&self, path: &Path) -> Result<bool, MountError> {
        Ok(self.table.lock().existing.contains(path))
    }

    async fn make_dir(&self, path: &Path, _mode: u32) -> Result<(), MountError> {
        self.table.lock().existing.insert(path.to_path_buf());
        Ok(())
    }

    async fn make_file(&self, path: &Path) -> Result<(), MountError> {
        self.table.lock().existing.insert(path.to_path_buf());
        Ok(())
    }

    async fn bind_mount(&self, _source: &Path, target: &Path, _ro: bool) -> Result<(), MountError> {
        self.table.lock().mounted.insert(target.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, path: &Path) -> Result<(), MountError> {
        self.table.lock().mounted.remove(path);
        Ok(())
    }

    async fn remove_path(&self, path: &Path) -> Result<(), MountError> {
        self.table.lock().existing.remove(path);
        Ok(())
    }
}

struct HostMounter {
    host: Arc<Host>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl Mounter for HostMounter {
    async fn stage(&self, staging_path: &Path) -> Result<(), MountError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let mut table = self.host.table.lock();
        table.helper_mounts += 1;
        table.mounted.insert(staging_path.to_path_buf());
        Ok(())
    }
}

struct HostMounters(Arc<Host>);

impl MounterFactory for HostMounters {
    fn new_mounter(
        &self,
        _bucket: &str,
        _config: &S3Config,
        _volume_id: &VolumeId,
    ) -> Result<Box<dyn Mounter>, MountError> {
        Ok(Box::new(HostMounter {
            host: Arc::clone(&self.0),
            gate: self.0.gate.lock().take(),
        }))
    }
}

struct Disk;

#[async_trait]
impl StatsUtils for Disk {
    async fn is_block_device(&self, _path: &Path) -> Result<bool, StatsError> {
        Ok(false)
    }

    async fn device_size(&self, _path: &Path) -> Result<u64, StatsError> {
        Ok(0)
    }

    async fn fs_stats(&self, _path: &Path) -> Result<FsStats, StatsError> {
        Ok(FsStats {
            available_bytes: 700,
            total_bytes: 1000,
            used_bytes: 300,
            total_inodes: 10,
            free_inodes: 8,
            used_inodes: 2,
        })
    }
}

#[derive(Default)]
struct Buckets(Mutex<HashSet<String>>);

#[async_trait]
impl ObjectStore for Buckets {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, S3Error> {
        Ok(self.0.lock().contains(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        self.0.lock().insert(bucket.to_owned());
        Ok(())
    }

    async fn owns_bucket(&self, bucket: &str) -> Result<bool, S3Error> {
        Ok(self.0.lock().contains(bucket))
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        self.0.lock().remove(bucket);
        Ok(())
    }
}

struct Clients(Arc<Buckets>);

impl ClientFactory for Clients {
    fn from_secrets(&self, secrets: &StringMap) -> Result<StorageClient, S3Error> {
        Ok(StorageClient {
            config: S3Config::from_secrets(secrets)?,
            store: self.0.clone(),
        })
    }
}

fn secrets() -> StringMap {
    StringMap::from([
        ("accessKeyID".to_owned(), "AKID".to_owned()),
        ("secretAccessKey".to_owned(), "SECRET".to_owned()),
        ("endpoint".to_owned(), "http://minio:9000".to_owned()),
    ])
}

fn writer() -> Option<VolumeCapability> {
    Some(VolumeCapability::mount(AccessMode::SingleNodeWriter))
}

fn stage(volume_id: &str, staging: &str) -> CsiMessage {
    CsiMessage::NodeStageVolume(NodeStageVolumeRequest {
        volume_id: volume_id.into(),
        staging_target_path: staging.into(),
        volume_capability: writer(),
        secrets: secrets(),
        ..Default::default()
    })
}

struct Harness {
    _dir: tempfile::TempDir,
    endpoint: Endpoint,
    host: Arc<Host>,
    buckets: Arc<Buckets>,
    handle: libcsi::ServerHandle,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Unix(dir.path().join("csi.sock"));
        let host = Arc::new(Host::default());
        let buckets = Arc::new(Buckets::default());
        let driver = S3Driver::with_node_utils(
            S3Driver::setup("s3.csi.rk8s.io", "0.1.0", "node-1").unwrap(),
            Arc::new(Clients(buckets.clone())),
            NodeUtils {
                mounts: host.clone(),
                mounters: Arc::new(HostMounters(host.clone())),
                stats: Arc::new(Disk),
            },
        );
        let handle = driver.start(&endpoint).await.unwrap();
        Self {
            _dir: dir,
            endpoint,
            host,
            buckets,
            handle,
        }
    }

    async fn client(&self) -> CsiClient {
        CsiClient::connect(&self.endpoint).await.unwrap()
    }

    async fn stop(self) {
        self.handle.shutdown();
        self.handle.wait().await.unwrap();
    }
}

fn code(result: Result<CsiMessage, CsiError>) -> Code {
    match result {
        Ok(_) => Code::Ok,
        Err(e) => e.code(),
    }
}

#[tokio::test]
async fn volume_lifecycle_over_the_socket() {
    let h = Harness::start().await;
    let client = h.client().await;

    let created = client
        .call(CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "pvc-1".into(),
            volume_capabilities: vec![VolumeCapability::mount(AccessMode::SingleNodeWriter)],
            secrets: secrets(),
            ..Default::default()
        }))
        .await
        .unwrap();
    let CsiMessage::VolumeCreated(volume) = created else {
        panic!("unexpected response {created}");
    };
    assert_eq!(volume.volume_id.as_str(), "pvc-1");
    assert!(h.buckets.0.lock().contains("pvc-1"));

    for _ in 0..2 {
        assert!(matches!(
            client.call(stage("pvc-1", "/staging/pvc-1")).await.unwrap(),
            CsiMessage::Ok
        ));
    }
    assert_eq!(h.host.helper_mounts(), 1);

    client
        .call(CsiMessage::NodePublishVolume(NodePublishVolumeRequest {
            volume_id: "pvc-1".into(),
            staging_target_path: "/staging/pvc-1".into(),
            target_path: "/pods/a/volume".into(),
            volume_capability: writer(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert!(h.host.mounted("/pods/a/volume"));

    let stats = client
        .call(CsiMessage::NodeGetVolumeStats(NodeGetVolumeStatsRequest {
            volume_id: "pvc-1".into(),
            volume_path: "/pods/a/volume".into(),
        }))
        .await
        .unwrap();
    let CsiMessage::VolumeStats(stats) = stats else {
        panic!("unexpected response {stats}");
    };
    let units: Vec<_> = stats.usage.iter().map(|u| u.unit).collect();
    assert_eq!(units, vec![UsageUnit::Bytes, UsageUnit::Inodes]);

    let unpublish = CsiMessage::NodeUnpublishVolume(NodeUnpublishVolumeRequest {
        volume_id: "pvc-1".into(),
        target_path: "/pods/a/volume".into(),
    });
    client.call(unpublish.clone()).await.unwrap();
    client.call(unpublish).await.unwrap();
    assert!(!h.host.mounted("/pods/a/volume"));

    let unstage = CsiMessage::NodeUnstageVolume(NodeUnstageVolumeRequest {
        volume_id: "pvc-1".into(),
        staging_target_path: "/staging/pvc-1".into(),
    });
    client.call(unstage.clone()).await.unwrap();
    client.call(unstage).await.unwrap();
    assert!(!h.host.mounted("/staging/pvc-1"));

    h.stop().await;
}

#[tokio::test]
async fn invalid_and_unsupported_requests() {
    let h = Harness::start().await;
    let client = h.client().await;

    assert_eq!(code(client.call(stage("", "/staging/x")).await), Code::InvalidArgument);

    let mut multi = NodeStageVolumeRequest {
        volume_id: "v1".into(),
        staging_target_path: "/staging/v1".into(),
        volume_capability: Some(VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)),
        secrets: secrets(),
        ..Default::default()
    };
    assert_eq!(
        code(client.call(CsiMessage::NodeStageVolume(multi.clone())).await),
        Code::InvalidArgument
    );
    multi.volume_capability = writer();
    multi.secrets.clear();
    assert_eq!(
        code(client.call(CsiMessage::NodeStageVolume(multi)).await),
        Code::Internal
    );
    assert_eq!(h.host.helper_mounts(), 0);

    assert_eq!(
        code(
            client
                .call(CsiMessage::NodeExpandVolume(NodeExpandVolumeRequest {
                    volume_id: "v1".into(),
                    ..Default::default()
                }))
                .await
        ),
        Code::Unimplemented
    );
    assert_eq!(
        code(
            client
                .call(CsiMessage::ControllerExpandVolume(Default::default()))
                .await
        ),
        Code::Unimplemented
    );
    assert_eq!(
        code(
            client
                .call(CsiMessage::NodeGetVolumeStats(NodeGetVolumeStatsRequest::default()))
                .await
        ),
        Code::InvalidArgument
    );

    h.stop().await;
}

#[tokio::test]
async fn slow_stage_does_not_hold_up_probe() {
    let h = Harness::start().await;
    let gate = h.host.hold_next_mount();

    let stager = h.client().await;
    let pending = tokio::spawn(async move { stager.call(stage("v1", "/staging/slow")).await });

    let prober = h.client().await;
    let ready = tokio::time::timeout(Duration::from_secs(5), prober.call(CsiMessage::Probe))
        .await
        .expect("probe blocked behind stage")
        .unwrap();
    assert!(matches!(ready, CsiMessage::ProbeResult(true)));
    assert!(!pending.is_finished());

    gate.notify_one();
    let staged = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(staged, CsiMessage::Ok));
    assert!(h.host.mounted("/staging/slow"));

    h.stop().await;
}
