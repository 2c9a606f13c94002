//! Controller role of the plugin: bucket-backed volume provisioning.

use std::sync::Arc;

use async_trait::async_trait;
use libcsi::{
    CapabilitySet, ControllerServiceCapability, CreateVolumeRequest, CsiController, CsiError,
    DefaultControllerServer, DeleteVolumeRequest, StringMap, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, Volume, VolumeId,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::mount::controller::VOLUME_CONTEXT_BUCKET;
use crate::registry::{VolumeRecord, VolumeRegistry};
use crate::s3::{ClientFactory, StorageClient};

/// Storage-class parameter naming an existing bucket to use.
pub const PARAM_BUCKET: &str = "bucket";

/// Longest volume id usable as a bucket name.
const MAX_VOLUME_ID_LEN: usize = 63;

/// Controller role: provisions one bucket per volume.
///
/// Buckets the plugin creates are tagged, so ownership survives a restart
/// that empties the [`VolumeRegistry`].
pub struct S3ControllerServer {
    base: DefaultControllerServer,
    capabilities: Arc<CapabilitySet>,
    clients: Arc<dyn ClientFactory>,
    registry: Arc<VolumeRegistry>,
}

impl S3ControllerServer {
    pub fn new(
        base: DefaultControllerServer,
        clients: Arc<dyn ClientFactory>,
        registry: Arc<VolumeRegistry>,
    ) -> Self {
        let capabilities = Arc::clone(&base.driver().capabilities);
        Self {
            base,
            capabilities,
            clients,
            registry,
        }
    }

    fn client(&self, secrets: &StringMap) -> Result<StorageClient, CsiError> {
        self.clients
            .from_secrets(secrets)
            .map_err(|e| CsiError::Internal(format!("failed to initialize S3 client: {e}")))
    }
}

/// Turn an orchestrator-chosen name into a volume id that is also a valid
/// bucket name.
pub fn sanitize_volume_id(name: &str) -> VolumeId {
    let id: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if id.len() > MAX_VOLUME_ID_LEN {
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        return VolumeId(format!("vol-{}", &digest[..40]));
    }
    VolumeId(id)
}

#[async_trait]
impl CsiController for S3ControllerServer {
    async fn get_capabilities(&self) -> Result<Vec<ControllerServiceCapability>, CsiError> {
        self.base.get_capabilities().await
    }

    #[instrument(skip_all, fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::invalid_argument("Volume name missing in request"));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::invalid_argument(
                "Volume capabilities missing in request",
            ));
        }
        for capability in &req.volume_capabilities {
            self.capabilities.validate(capability)?;
        }

        let capacity = req.capacity_range.map(|r| r.required_bytes).unwrap_or(0);
        if let Some(existing) = self.registry.get_by_name(&req.name) {
            if existing.volume.capacity_bytes != capacity {
                return Err(CsiError::VolumeAlreadyExists(format!(
                    "{} with capacity {} (requested {capacity})",
                    existing.volume.volume_id, existing.volume.capacity_bytes
                )));
            }
            debug!(volume_id = %existing.volume.volume_id, "volume already provisioned");
            return Ok(existing.volume);
        }

        let volume_id = sanitize_volume_id(&req.name);
        let bucket = req
            .parameters
            .get(PARAM_BUCKET)
            .filter(|b| !b.is_empty())
            .cloned()
            .unwrap_or_else(|| volume_id.to_string());

        let client = self.client(&req.secrets)?;
        let exists = client
            .store
            .bucket_exists(&bucket)
            .await
            .map_err(CsiError::backend)?;
        let owns_bucket = if exists {
            client
                .store
                .owns_bucket(&bucket)
                .await
                .map_err(CsiError::backend)?
        } else {
            client
                .store
                .create_bucket(&bucket)
                .await
                .map_err(CsiError::backend)?;
            info!(%bucket, "bucket created");
            true
        };

        let volume = Volume {
            volume_id,
            capacity_bytes: capacity,
            volume_context: StringMap::from([(VOLUME_CONTEXT_BUCKET.to_owned(), bucket.clone())]),
        };
        self.registry.insert(VolumeRecord {
            name: req.name,
            volume: volume.clone(),
            bucket,
            owns_bucket,
        });
        info!(volume_id = %volume.volume_id, "volume created");
        Ok(volume)
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::invalid_argument("Volume ID missing in request"));
        }
        let (bucket, recorded) = match self.registry.get(&req.volume_id) {
            Some(record) => (record.bucket, Some(record.owns_bucket)),
            None => (req.volume_id.to_string(), None),
        };

        let client = self.client(&req.secrets)?;
        let owns_bucket = match recorded {
            Some(owns) => owns,
            // Not seen since start; the bucket tag decides.
            None => client
                .store
                .owns_bucket(&bucket)
                .await
                .map_err(CsiError::backend)?,
        };
        if owns_bucket {
            client
                .store
                .remove_bucket(&bucket)
                .await
                .map_err(CsiError::backend)?;
            info!(%bucket, "bucket removed");
        } else {
            debug!(%bucket, "keeping bucket not created by the plugin");
        }

        self.registry.remove(&req.volume_id);
        info!("volume deleted");
        Ok(())
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::invalid_argument("Volume ID missing in request"));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::invalid_argument(
                "Volume capabilities missing in request",
            ));
        }

        let bucket = self
            .registry
            .get(&req.volume_id)
            .map(|r| r.bucket)
            .unwrap_or_else(|| req.volume_id.to_string());
        let client = self.client(&req.secrets)?;
        let exists = client
            .store
            .bucket_exists(&bucket)
            .await
            .map_err(CsiError::backend)?;
        if !exists {
            return Err(CsiError::VolumeNotFound(req.volume_id.to_string()));
        }

        let unsupported: Vec<_> = req
            .volume_capabilities
            .iter()
            .filter(|c| self.capabilities.validate(c).is_err())
            .map(|c| format!("{:?}", c.access_mode))
            .collect();
        if unsupported.is_empty() {
            Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: Some(req.volume_capabilities),
                message: String::new(),
            })
        } else {
            Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: format!("unsupported access modes: {}", unsupported.join(", ")),
            })
        }
    }
}
