//! Plugin wiring: one capability set, one storage client factory and the
//! three service roles behind a single endpoint.

use std::sync::Arc;

use libcsi::{
    AccessMode, CapabilitySet, ControllerServiceCapability, CsiDriver, CsiError, CsiServer,
    DefaultControllerServer, DefaultIdentityServer, DefaultNodeServer, Endpoint,
    NodeServiceCapability, RequestObserver, ServerHandle,
};
use thiserror::Error;
use tracing::info;

use crate::controller::S3ControllerServer;
use crate::identity::S3IdentityServer;
use crate::mount::{FuseMounterFactory, HostMountUtils, MountController, MountUtils, MounterFactory};
use crate::node::S3NodeServer;
use crate::registry::VolumeRegistry;
use crate::s3::ClientFactory;
use crate::stats::{HostStatsUtils, StatsUtils, VolumeStatsProbe};

/// Reasons [`S3Driver::setup`] rejects a descriptor.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no driver name provided")]
    MissingName,
    #[error("no driver version provided")]
    MissingVersion,
}

/// What the plugin advertises.
pub fn capabilities() -> CapabilitySet {
    CapabilitySet::builder()
        .controller([ControllerServiceCapability::CreateDeleteVolume])
        .node([
            NodeServiceCapability::StageUnstageVolume,
            NodeServiceCapability::GetVolumeStats,
        ])
        .access_modes([AccessMode::SingleNodeWriter])
        .build()
}

/// Host-side collaborators of the node role.
pub struct NodeUtils {
    pub mounts: Arc<dyn MountUtils>,
    pub mounters: Arc<dyn MounterFactory>,
    pub stats: Arc<dyn StatsUtils>,
}

impl NodeUtils {
    /// The real host: `/proc/self/mountinfo`, FUSE helpers and syscalls.
    pub fn host() -> Self {
        let mounts: Arc<dyn MountUtils> = Arc::new(HostMountUtils::new());
        Self {
            mounters: Arc::new(FuseMounterFactory::new(Arc::clone(&mounts))),
            mounts,
            stats: Arc::new(HostStatsUtils),
        }
    }
}

/// The assembled plugin, serving every role from one descriptor.
pub struct S3Driver {
    driver: Arc<CsiDriver>,
    identity: Arc<S3IdentityServer>,
    controller: Arc<S3ControllerServer>,
    node: Arc<S3NodeServer>,
    observer: Option<Arc<dyn RequestObserver>>,
}

impl S3Driver {
    /// Descriptor for this plugin; name and version must both be set.
    pub fn setup(
        name: impl Into<String>,
        vendor_version: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Result<CsiDriver, SetupError> {
        let name = name.into();
        let vendor_version = vendor_version.into();
        if name.is_empty() {
            return Err(SetupError::MissingName);
        }
        if vendor_version.is_empty() {
            return Err(SetupError::MissingVersion);
        }
        let node_id = node_id.into();
        info!(%name, %vendor_version, %node_id, "setting up driver");
        Ok(CsiDriver::new(name, vendor_version, node_id, capabilities()))
    }

    /// Wire the plugin against the real host.
    pub fn new(driver: CsiDriver, clients: Arc<dyn ClientFactory>) -> Self {
        Self::with_node_utils(driver, clients, NodeUtils::host())
    }

    /// Wire the plugin with caller-supplied node collaborators.
    pub fn with_node_utils(
        driver: CsiDriver,
        clients: Arc<dyn ClientFactory>,
        utils: NodeUtils,
    ) -> Self {
        let driver = Arc::new(driver);
        let registry = Arc::new(VolumeRegistry::new());

        let identity = S3IdentityServer::new(DefaultIdentityServer::new(Arc::clone(&driver)));
        let controller = S3ControllerServer::new(
            DefaultControllerServer::new(Arc::clone(&driver)),
            Arc::clone(&clients),
            registry,
        );
        let mounts = MountController::new(
            Arc::clone(&driver.capabilities),
            utils.mounts,
            clients,
            utils.mounters,
        );
        let node = S3NodeServer::new(
            DefaultNodeServer::new(Arc::clone(&driver)),
            mounts,
            VolumeStatsProbe::new(utils.stats),
        );

        Self {
            driver,
            identity: Arc::new(identity),
            controller: Arc::new(controller),
            node: Arc::new(node),
            observer: None,
        }
    }

    /// Report every served request to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The descriptor being served.
    pub fn descriptor(&self) -> &CsiDriver {
        &self.driver
    }

    /// Serve all three roles on `endpoint` without blocking the caller.
    pub async fn start(&self, endpoint: &Endpoint) -> Result<ServerHandle, CsiError> {
        let mut server = CsiServer::new(
            self.identity.clone(),
            self.controller.clone(),
            self.node.clone(),
        );
        if let Some(observer) = &self.observer {
            server = server.with_observer(Arc::clone(observer));
        }
        info!(driver = %self.driver.name, node_id = %self.driver.node_id, "starting CSI host");
        server.start(endpoint).await
    }

    /// Serve until the host stops.
    pub async fn run(&self, endpoint: &Endpoint) -> Result<(), CsiError> {
        self.start(endpoint).await?.wait().await
    }
}

#[cfg(test)]
mod tests {
    use libcsi::{CsiClient, CsiMessage, PluginCapability, PluginInfo};

    use super::*;
    use crate::stats::FsStats;
    use crate::testing::{FakeClients, FakeMountUtils, FakeMounters, FakeStats};

    fn fake_utils() -> NodeUtils {
        let mounts = Arc::new(FakeMountUtils::default());
        NodeUtils {
            mounters: Arc::new(FakeMounters::new(mounts.clone())),
            mounts,
            stats: Arc::new(FakeStats::filesystem(FsStats::default())),
        }
    }

    #[test]
    fn setup_requires_name_and_version() {
        assert!(matches!(
            S3Driver::setup("", "1.0.0", "n1"),
            Err(SetupError::MissingName)
        ));
        assert!(matches!(
            S3Driver::setup("s3.csi", "", "n1"),
            Err(SetupError::MissingVersion)
        ));
        let driver = S3Driver::setup("s3.csi", "1.0.0", "n1").unwrap();
        assert_eq!(*driver.capabilities, capabilities());
    }

    #[test]
    fn advertises_single_node_writer_only() {
        let caps = capabilities();
        assert_eq!(caps.access_modes(), &[AccessMode::SingleNodeWriter]);
        assert!(caps.has_controller(ControllerServiceCapability::CreateDeleteVolume));
    }

    #[tokio::test]
    async fn run_serves_identity_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Unix(dir.path().join("csi.sock"));
        let driver = S3Driver::with_node_utils(
            S3Driver::setup("s3.csi", "1.0.0", "n1").unwrap(),
            Arc::new(FakeClients::default()),
            fake_utils(),
        );
        let handle = driver.start(&endpoint).await.unwrap();

        let client = CsiClient::connect(&endpoint).await.unwrap();
        match client.call(CsiMessage::GetPluginInfo).await.unwrap() {
            CsiMessage::PluginInfoResponse(info) => assert_eq!(
                info,
                PluginInfo {
                    name: "s3.csi".into(),
                    vendor_version: "1.0.0".into(),
                }
            ),
            other => panic!("unexpected response {other}"),
        }
        assert!(matches!(
            client.call(CsiMessage::GetPluginCapabilities).await.unwrap(),
            CsiMessage::PluginCapabilitiesResponse(caps)
                if caps == vec![PluginCapability::ControllerService]
        ));

        handle.shutdown();
        handle.wait().await.unwrap();
    }
}
