//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local filesystem
//! operations required to make a volume available to workloads:
//!
//! 1. **Stage**: mount the backing store once at a node-global path.
//! 2. **Publish**: bind-mount the global path into a workload path.
//! 3. **Unpublish**: remove the bind-mount.
//! 4. **Unstage**: unmount the global mount.
//!
//! All four transitions must be idempotent.  Stats and expansion are
//! optional and answer `Unimplemented` unless overridden.

use std::sync::Arc;

use async_trait::async_trait;

use crate::driver::CsiDriver;
use crate::error::CsiError;
use crate::types::{
    NodeExpandVolumeRequest, NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodeInfo,
    NodePublishVolumeRequest, NodeServiceCapability, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at the global staging path.
    async fn stage_volume(&self, _req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("NodeStageVolume"))
    }

    /// Unmount the global staging path.
    async fn unstage_volume(&self, _req: NodeUnstageVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("NodeUnstageVolume"))
    }

    /// Bind-mount the staged volume into the workload target path.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Remove the workload bind-mount.
    async fn unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<(), CsiError>;

    /// Capacity and usage of a volume path.
    async fn get_volume_stats(
        &self,
        _req: NodeGetVolumeStatsRequest,
    ) -> Result<NodeGetVolumeStatsResponse, CsiError> {
        Err(CsiError::unimplemented("NodeGetVolumeStats"))
    }

    /// Grow a volume on the node.
    async fn expand_volume(&self, _req: NodeExpandVolumeRequest) -> Result<u64, CsiError> {
        Err(CsiError::unimplemented("NodeExpandVolume"))
    }

    /// Report the node RPCs this plugin supports.
    async fn get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}

/// Baseline Node behavior: node info and capabilities from the driver
/// descriptor.  It cannot publish anything on its own, so the mount RPCs
/// answer `Unimplemented`.
#[derive(Debug, Clone)]
pub struct DefaultNodeServer {
    driver: Arc<CsiDriver>,
}

impl DefaultNodeServer {
    pub fn new(driver: Arc<CsiDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &CsiDriver {
        &self.driver
    }
}

#[async_trait]
impl CsiNode for DefaultNodeServer {
    async fn publish_volume(&self, _req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("NodePublishVolume"))
    }

    async fn unpublish_volume(&self, _req: NodeUnpublishVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("NodeUnpublishVolume"))
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, CsiError> {
        Ok(self.driver.capabilities.node().to_vec())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.driver.node_id.clone(),
            max_volumes: 0,
        })
    }
}
