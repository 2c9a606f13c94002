//! Capability registry.
//!
//! A [`CapabilitySet`] is configured exactly once while the driver is being
//! set up and is read-only afterwards; services share it through an `Arc`
//! without any locking.

use tracing::info;

use crate::error::CsiError;
use crate::types::{AccessMode, ControllerServiceCapability, NodeServiceCapability, VolumeCapability};

/// Controller/node RPC capabilities and volume access modes a plugin
/// advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    controller: Vec<ControllerServiceCapability>,
    node: Vec<NodeServiceCapability>,
    access_modes: Vec<AccessMode>,
}

impl CapabilitySet {
    pub fn builder() -> CapabilitySetBuilder {
        CapabilitySetBuilder::default()
    }

    pub fn controller(&self) -> &[ControllerServiceCapability] {
        &self.controller
    }

    pub fn node(&self) -> &[NodeServiceCapability] {
        &self.node
    }

    pub fn access_modes(&self) -> &[AccessMode] {
        &self.access_modes
    }

    pub fn has_controller(&self, cap: ControllerServiceCapability) -> bool {
        self.controller.contains(&cap)
    }

    pub fn supports_access_mode(&self, mode: AccessMode) -> bool {
        self.access_modes.contains(&mode)
    }

    /// Reject a capability whose access mode is not advertised.
    pub fn validate(&self, cap: &VolumeCapability) -> Result<(), CsiError> {
        if self.supports_access_mode(cap.access_mode) {
            Ok(())
        } else {
            Err(CsiError::invalid_argument(format!(
                "volume capability not supported: access mode {:?}",
                cap.access_mode
            )))
        }
    }
}

/// One-shot builder for [`CapabilitySet`].
#[derive(Debug, Default)]
pub struct CapabilitySetBuilder {
    set: CapabilitySet,
}

impl CapabilitySetBuilder {
    pub fn controller(mut self, caps: impl IntoIterator<Item = ControllerServiceCapability>) -> Self {
        for cap in caps {
            info!(capability = ?cap, "adding controller service capability");
            self.set.controller.push(cap);
        }
        self
    }

    pub fn node(mut self, caps: impl IntoIterator<Item = NodeServiceCapability>) -> Self {
        for cap in caps {
            info!(capability = ?cap, "adding node service capability");
            self.set.node.push(cap);
        }
        self
    }

    pub fn access_modes(mut self, modes: impl IntoIterator<Item = AccessMode>) -> Self {
        for mode in modes {
            info!(mode = ?mode, "enabling volume access mode");
            self.set.access_modes.push(mode);
        }
        self
    }

    pub fn build(self) -> CapabilitySet {
        self.set
    }
}
