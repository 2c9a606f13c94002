//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle.  Only
//! [`CsiController::get_capabilities`] is mandatory; every other RPC has a
//! provided method answering `Unimplemented`, so a plugin overrides exactly
//! the calls it supports.

use std::sync::Arc;

use async_trait::async_trait;

use crate::driver::CsiDriver;
use crate::error::CsiError;
use crate::types::{
    ControllerExpandVolumeRequest, ControllerServiceCapability, CreateVolumeRequest,
    DeleteVolumeRequest, ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse,
    Volume,
};

/// Controller service: centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Report the controller RPCs this plugin supports.
    async fn get_capabilities(&self) -> Result<Vec<ControllerServiceCapability>, CsiError>;

    /// Provision a new volume.
    async fn create_volume(&self, _req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        Err(CsiError::unimplemented("CreateVolume"))
    }

    /// Delete a previously provisioned volume.
    async fn delete_volume(&self, _req: DeleteVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("DeleteVolume"))
    }

    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        _req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError> {
        Err(CsiError::unimplemented("ValidateVolumeCapabilities"))
    }

    /// Grow a volume from the control plane.
    async fn expand_volume(&self, _req: ControllerExpandVolumeRequest) -> Result<u64, CsiError> {
        Err(CsiError::unimplemented("ControllerExpandVolume"))
    }
}

/// Baseline Controller behavior: capabilities from the driver descriptor,
/// everything else `Unimplemented`.
#[derive(Debug, Clone)]
pub struct DefaultControllerServer {
    driver: Arc<CsiDriver>,
}

impl DefaultControllerServer {
    pub fn new(driver: Arc<CsiDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &CsiDriver {
        &self.driver
    }
}

#[async_trait]
impl CsiController for DefaultControllerServer {
    async fn get_capabilities(&self) -> Result<Vec<ControllerServiceCapability>, CsiError> {
        Ok(self.driver.capabilities.controller().to_vec())
    }
}
