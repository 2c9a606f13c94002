//! Identity role of the plugin.

use async_trait::async_trait;
use libcsi::{CsiError, CsiIdentity, DefaultIdentityServer, PluginCapability, PluginInfo};
use tracing::debug;

/// Identity server; everything comes from the driver descriptor.
pub struct S3IdentityServer {
    base: DefaultIdentityServer,
}

impl S3IdentityServer {
    pub fn new(base: DefaultIdentityServer) -> Self {
        Self { base }
    }
}

#[async_trait]
impl CsiIdentity for S3IdentityServer {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        self.base.get_plugin_info().await
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        debug!("probe");
        self.base.probe().await
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        self.base.get_plugin_capabilities().await
    }
}
