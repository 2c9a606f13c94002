//! Node role of the plugin.
//!
//! Mount transitions go to the [`MountController`], usage queries to the
//! [`VolumeStatsProbe`]; node info and capabilities come from the baseline
//! server.  Expansion keeps the trait's `Unimplemented` answer.

use async_trait::async_trait;
use libcsi::{
    CsiError, CsiNode, DefaultNodeServer, NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse,
    NodeInfo, NodePublishVolumeRequest, NodeServiceCapability, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
};

use crate::mount::MountController;
use crate::stats::VolumeStatsProbe;

/// Node role: mount transitions and volume usage for this host.
pub struct S3NodeServer {
    base: DefaultNodeServer,
    mounts: MountController,
    stats: VolumeStatsProbe,
}

impl S3NodeServer {
    pub fn new(base: DefaultNodeServer, mounts: MountController, stats: VolumeStatsProbe) -> Self {
        Self {
            base,
            mounts,
            stats,
        }
    }
}

#[async_trait]
impl CsiNode for S3NodeServer {
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        self.mounts.stage(&req).await
    }

    async fn unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), CsiError> {
        self.mounts.unstage(&req).await
    }

    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        self.mounts.publish(&req).await
    }

    async fn unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<(), CsiError> {
        self.mounts.unpublish(&req).await
    }

    async fn get_volume_stats(
        &self,
        req: NodeGetVolumeStatsRequest,
    ) -> Result<NodeGetVolumeStatsResponse, CsiError> {
        self.stats.stats(&req).await
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, CsiError> {
        self.base.get_capabilities().await
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        self.base.get_info().await
    }
}
