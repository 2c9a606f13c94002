//! Driver descriptor shared by the baseline servers.

use std::sync::Arc;

use crate::capability::CapabilitySet;

/// Identity of a running plugin plus the capabilities it advertises.
///
/// Built once at startup and handed to every service role as an
/// `Arc<CsiDriver>`.
#[derive(Debug, Clone)]
pub struct CsiDriver {
    pub name: String,
    pub vendor_version: String,
    pub node_id: String,
    pub capabilities: Arc<CapabilitySet>,
}

impl CsiDriver {
    pub fn new(
        name: impl Into<String>,
        vendor_version: impl Into<String>,
        node_id: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            name: name.into(),
            vendor_version: vendor_version.into(),
            node_id: node_id.into(),
            capabilities: Arc::new(capabilities),
        }
    }
}
