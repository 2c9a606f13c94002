//! CSI Identity service trait.
//!
//! The Identity service allows callers to discover plugin metadata and check
//! plugin health.  Every CSI plugin must implement this service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::driver::CsiDriver;
use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// Identity service: plugin discovery and health probing.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Return the plugin name and version.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// Readiness probe.  Returns `true` when the plugin is ready to serve.
    async fn probe(&self) -> Result<bool, CsiError>;

    /// Advertise the capabilities supported by this plugin.
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}

/// Baseline Identity behavior derived from the driver descriptor.
#[derive(Debug, Clone)]
pub struct DefaultIdentityServer {
    driver: Arc<CsiDriver>,
}

impl DefaultIdentityServer {
    pub fn new(driver: Arc<CsiDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &CsiDriver {
        &self.driver
    }
}

#[async_trait]
impl CsiIdentity for DefaultIdentityServer {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        if self.driver.name.is_empty() {
            return Err(CsiError::Unavailable("driver name not configured".into()));
        }
        if self.driver.vendor_version.is_empty() {
            return Err(CsiError::Unavailable("driver is missing version".into()));
        }
        Ok(PluginInfo {
            name: self.driver.name.clone(),
            vendor_version: self.driver.vendor_version.clone(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}
