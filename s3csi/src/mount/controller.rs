//! The stage/publish protocol.
//!
//! ```text
//! Unmounted --stage--> Staged --publish--> Published
//!     ^                 |  ^                   |
//!     +----unstage------+  +-----unpublish-----+
//! ```
//!
//! Nothing here is remembered between calls.  Each transition validates
//! its request, takes the lock for the path it mutates, and asks the live
//! mount table where the path stands before acting.  Repeating a transition
//! that already happened is a successful no-op.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libcsi::{
    CapabilitySet, CsiError, NodePublishVolumeRequest, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, VolumeCapability, VolumeId,
};
use tracing::{debug, info, instrument, warn};

use super::{MountError, MountUtils, MounterFactory, PathLocks, STAGING_DIR_MODE};
use crate::s3::ClientFactory;

/// Publish-context key naming the device to expose for block volumes.
pub const PUBLISH_CONTEXT_DEVICE_PATH: &str = "devicePath";
/// Volume-context key carrying the bucket chosen at creation.
pub const VOLUME_CONTEXT_BUCKET: &str = "bucket";

/// Drives node-side stage and publish transitions against the host.
pub struct MountController {
    capabilities: Arc<CapabilitySet>,
    mount_utils: Arc<dyn MountUtils>,
    clients: Arc<dyn ClientFactory>,
    mounters: Arc<dyn MounterFactory>,
    locks: PathLocks,
}

/// Where a path stands in the mount table.
enum Probe {
    Mounted,
    /// Listed but unreachable; only an unmount clears it.
    Corrupted,
    NotMounted,
    Missing,
}

impl MountController {
    /// Builds a controller checking access modes against `capabilities`.
    pub fn new(
        capabilities: Arc<CapabilitySet>,
        mount_utils: Arc<dyn MountUtils>,
        clients: Arc<dyn ClientFactory>,
        mounters: Arc<dyn MounterFactory>,
    ) -> Self {
        Self {
            capabilities,
            mount_utils,
            clients,
            mounters,
            locks: PathLocks::new(),
        }
    }

    /// Mount the volume's bucket at the staging path.
    #[instrument(skip_all, fields(volume_id = %req.volume_id, staging = %req.staging_target_path))]
    pub async fn stage(&self, req: &NodeStageVolumeRequest) -> Result<(), CsiError> {
        require_volume_id(&req.volume_id)?;
        let staging = require_path(&req.staging_target_path, "Staging target path")?;
        let capability = self.require_capability(req.volume_capability.as_ref())?;
        debug!(access_mode = ?capability.access_mode, "stage request validated");

        let _guard = self.locks.lock(&staging).await;
        match self.probe(&staging).await? {
            Probe::Mounted => {
                debug!("staging path already mounted");
                return Ok(());
            }
            Probe::Corrupted => {
                warn!("staging mount is broken, remounting");
                self.mount_utils
                    .unmount(&staging)
                    .await
                    .map_err(|e| unmount_failed(&staging, e))?;
            }
            Probe::Missing => self
                .mount_utils
                .make_dir(&staging, STAGING_DIR_MODE)
                .await
                .map_err(|e| mount_failed(&staging, "create staging directory", e))?,
            Probe::NotMounted => {}
        }

        let client = self
            .clients
            .from_secrets(&req.secrets)
            .map_err(|e| CsiError::Internal(format!("failed to initialize S3 client: {e}")))?;
        let bucket = client
            .config
            .existing_bucket
            .clone()
            .or_else(|| req.volume_context.get(VOLUME_CONTEXT_BUCKET).cloned())
            .unwrap_or_else(|| req.volume_id.to_string());

        let mounter = self
            .mounters
            .new_mounter(&bucket, &client.config, &req.volume_id)
            .map_err(|e| mount_failed(&staging, "prepare mounter", e))?;
        mounter
            .stage(&staging)
            .await
            .map_err(|e| mount_failed(&staging, "mount bucket", e))?;

        info!(%bucket, "volume staged");
        Ok(())
    }

    /// Unmount the staging path; the directory itself is left in place.
    #[instrument(skip_all, fields(volume_id = %req.volume_id, staging = %req.staging_target_path))]
    pub async fn unstage(&self, req: &NodeUnstageVolumeRequest) -> Result<(), CsiError> {
        require_volume_id(&req.volume_id)?;
        let staging = require_path(&req.staging_target_path, "Staging target path")?;

        let _guard = self.locks.lock(&staging).await;
        match self.probe(&staging).await? {
            Probe::Mounted => {}
            Probe::Corrupted => warn!("staging mount is broken, unmounting"),
            Probe::NotMounted | Probe::Missing => {
                debug!("staging path not mounted, nothing to unstage");
                return Ok(());
            }
        }
        self.mount_utils
            .unmount(&staging)
            .await
            .map_err(|e| unmount_failed(&staging, e))?;

        info!("volume unstaged");
        Ok(())
    }

    /// Bind the staged volume, or the block device, onto the target path.
    #[instrument(skip_all, fields(volume_id = %req.volume_id, target = %req.target_path))]
    pub async fn publish(&self, req: &NodePublishVolumeRequest) -> Result<(), CsiError> {
        require_volume_id(&req.volume_id)?;
        let target = require_path(&req.target_path, "Target path")?;
        let staging = require_path(&req.staging_target_path, "Staging target path")?;
        let capability = self.require_capability(req.volume_capability.as_ref())?;

        let block = capability.is_block();
        let source = if block {
            let source = req
                .publish_context
                .get(PUBLISH_CONTEXT_DEVICE_PATH)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| staging.clone());
            let exists = self
                .mount_utils
                .path_exists(&source)
                .await
                .map_err(|e| CsiError::Internal(format!("failed to check block source: {e}")))?;
            if !exists {
                return Err(CsiError::invalid_argument(format!(
                    "block source {} does not exist",
                    source.display()
                )));
            }
            source
        } else {
            match self.probe(&staging).await? {
                Probe::Mounted => staging,
                Probe::Corrupted => {
                    return Err(CsiError::Internal(format!(
                        "staging path {} has a broken mount",
                        staging.display()
                    )));
                }
                Probe::NotMounted | Probe::Missing => {
                    return Err(CsiError::Internal(format!(
                        "staging path {} is not mounted",
                        staging.display()
                    )));
                }
            }
        };

        let _guard = self.locks.lock(&target).await;
        match self.probe(&target).await? {
            Probe::Mounted => {
                debug!("target already published");
                return Ok(());
            }
            Probe::Corrupted => {
                warn!("target mount is broken, binding again");
                self.mount_utils
                    .unmount(&target)
                    .await
                    .map_err(|e| unmount_failed(&target, e))?;
            }
            Probe::Missing if block => self
                .mount_utils
                .make_file(&target)
                .await
                .map_err(|e| mount_failed(&target, "create block target", e))?,
            Probe::Missing => self
                .mount_utils
                .make_dir(&target, STAGING_DIR_MODE)
                .await
                .map_err(|e| mount_failed(&target, "create target directory", e))?,
            Probe::NotMounted => {}
        }

        self.mount_utils
            .bind_mount(&source, &target, req.readonly)
            .await
            .map_err(|e| mount_failed(&target, "bind mount", e))?;

        info!(source = %source.display(), readonly = req.readonly, block, "volume published");
        Ok(())
    }

    /// Unmount the target path and remove it.
    #[instrument(skip_all, fields(volume_id = %req.volume_id, target = %req.target_path))]
    pub async fn unpublish(&self, req: &NodeUnpublishVolumeRequest) -> Result<(), CsiError> {
        require_volume_id(&req.volume_id)?;
        let target = require_path(&req.target_path, "Target path")?;

        let _guard = self.locks.lock(&target).await;
        match self.probe(&target).await? {
            Probe::Missing => {
                debug!("target already gone");
                return Ok(());
            }
            Probe::Mounted | Probe::Corrupted => self
                .mount_utils
                .unmount(&target)
                .await
                .map_err(|e| unmount_failed(&target, e))?,
            Probe::NotMounted => debug!("target not mounted"),
        }
        self.mount_utils
            .remove_path(&target)
            .await
            .map_err(|e| unmount_failed(&target, e))?;

        info!("volume unpublished");
        Ok(())
    }

    fn require_capability<'a>(
        &self,
        capability: Option<&'a VolumeCapability>,
    ) -> Result<&'a VolumeCapability, CsiError> {
        let capability = capability
            .ok_or_else(|| CsiError::invalid_argument("Volume capability missing in request"))?;
        self.capabilities.validate(capability)?;
        Ok(capability)
    }

    async fn probe(&self, path: &Path) -> Result<Probe, CsiError> {
        match self.mount_utils.is_mount_point(path).await {
            Ok(true) => Ok(Probe::Mounted),
            Ok(false) => Ok(Probe::NotMounted),
            Err(MountError::NotFound(_)) => Ok(Probe::Missing),
            Err(MountError::Corrupted { .. }) => Ok(Probe::Corrupted),
            Err(e) => Err(CsiError::Internal(format!(
                "failed to check mount point {}: {e}",
                path.display()
            ))),
        }
    }
}

fn require_volume_id(volume_id: &VolumeId) -> Result<(), CsiError> {
    if volume_id.is_empty() {
        return Err(CsiError::invalid_argument("Volume ID missing in request"));
    }
    Ok(())
}

fn require_path(path: &str, what: &str) -> Result<PathBuf, CsiError> {
    if path.is_empty() {
        return Err(CsiError::invalid_argument(format!("{what} missing in request")));
    }
    Ok(PathBuf::from(path))
}

fn mount_failed(path: &Path, phase: &str, e: MountError) -> CsiError {
    CsiError::MountFailed {
        path: path.display().to_string(),
        reason: format!("{phase}: {e}"),
    }
}

fn unmount_failed(path: &Path, e: MountError) -> CsiError {
    CsiError::UnmountFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
