//! Core CSI types: volumes, capabilities, requests and responses.
//!
//! These types form the data model shared by the CSI traits, the transport
//! layer and plugin implementations.  They are all
//! [`Serialize`]/[`Deserialize`] so they can be framed over the socket as JSON.
//!
//! Request fields the protocol marks REQUIRED are still modelled as plain
//! strings / `Option`s: an empty or absent value is a caller error that the
//! service reports as `InvalidArgument`, not something the decoder rejects.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
///
/// For object-storage volumes the handle doubles as the default bucket name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// `true` when the caller left the handle empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Free-form string map used for secrets, parameters and contexts.
pub type StringMap = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AccessMode {
    #[default]
    Unknown,
    /// Can only be published once as read/write on a single node.
    SingleNodeWriter,
    /// Can only be published once as readonly on a single node.
    SingleNodeReaderOnly,
    /// Can be published as readonly at multiple nodes simultaneously.
    MultiNodeReaderOnly,
    /// Published at multiple nodes, only one of which may write.
    MultiNodeSingleWriter,
    /// Published as read/write at multiple nodes simultaneously.
    MultiNodeMultiWriter,
    /// Published as read/write by a single workload on a single node.
    SingleNodeSingleWriter,
    /// Published as read/write by multiple workloads on a single node.
    SingleNodeMultiWriter,
}

/// How the volume is presented to the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// Mounted filesystem.
    Mount {
        /// Filesystem type; empty means the plugin default.
        #[serde(default)]
        fs_type: String,
        /// Additional mount flags (e.g. `"noatime"`).
        #[serde(default)]
        mount_flags: Vec<String>,
    },
    /// Raw block device.
    Block,
}

/// A `{mount-or-block, access-mode}` pair requested by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    pub access_type: AccessType,
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// Filesystem capability with the given access mode.
    pub fn mount(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags: Vec::new(),
            },
            access_mode,
        }
    }

    /// Raw block capability with the given access mode.
    pub fn block(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Block,
            access_mode,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.access_type, AccessType::Block)
    }
}

/// RPCs of the Controller service a plugin may advertise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ControllerServiceCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ListVolumes,
    GetCapacity,
    ExpandVolume,
}

/// RPCs of the Node service a plugin may advertise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeServiceCapability {
    StageUnstageVolume,
    GetVolumeStats,
    ExpandVolume,
}

/// Capabilities advertised by the plugin as a whole.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Full metadata for a provisioned volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes; 0 means unknown / unbounded.
    pub capacity_bytes: u64,
    /// Opaque context passed from Controller to Node operations.
    #[serde(default)]
    pub volume_context: StringMap,
}

/// Capacity bounds requested on create.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityRange {
    pub required_bytes: u64,
    pub limit_bytes: u64,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"s3.csi.rk8s.io"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

// ---------------------------------------------------------------------------
// Controller requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Caller-chosen name, used as the idempotency key.
    pub name: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage-class parameters forwarded to the backend.
    #[serde(default)]
    pub parameters: StringMap,
    #[serde(default)]
    pub secrets: StringMap,
}

/// Request to delete a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteVolumeRequest {
    pub volume_id: VolumeId,
    #[serde(default)]
    pub secrets: StringMap,
}

/// Request to check a set of capabilities against an existing volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateVolumeCapabilitiesRequest {
    pub volume_id: VolumeId,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub secrets: StringMap,
}

/// Result of a capability validation.
///
/// `confirmed` is only set when every requested capability is supported;
/// otherwise `message` says why not.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidateVolumeCapabilitiesResponse {
    pub confirmed: Option<Vec<VolumeCapability>>,
    #[serde(default)]
    pub message: String,
}

/// Request to grow a volume from the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerExpandVolumeRequest {
    pub volume_id: VolumeId,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
}

// ---------------------------------------------------------------------------
// Node requests
// ---------------------------------------------------------------------------

/// Request to stage (globally mount) a volume on a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Global staging mount point.
    pub staging_target_path: String,
    /// Requested capability; absence is a caller error.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Credentials and backend settings for the storage client.
    #[serde(default)]
    pub secrets: StringMap,
    #[serde(default)]
    pub publish_context: StringMap,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: StringMap,
}

/// Request to unstage a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUnstageVolumeRequest {
    pub volume_id: VolumeId,
    pub staging_target_path: String,
}

/// Request to publish (bind-mount) a staged volume into a workload path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// The global staging mount point (source of the bind mount).
    pub staging_target_path: String,
    /// Workload-visible target path.
    pub target_path: String,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the bind mount should be read-only.
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub publish_context: StringMap,
    #[serde(default)]
    pub volume_context: StringMap,
}

/// Request to remove a workload bind mount.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: VolumeId,
    pub target_path: String,
}

/// Request for capacity/usage of a published or staged volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeGetVolumeStatsRequest {
    pub volume_id: VolumeId,
    pub volume_path: String,
}

/// Unit of a [`VolumeUsage`] entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsageUnit {
    #[default]
    Unknown,
    Bytes,
    Inodes,
}

/// One capacity/consumption measurement.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeUsage {
    pub available: u64,
    pub total: u64,
    pub used: u64,
    pub unit: UsageUnit,
}

/// Response to `NodeGetVolumeStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeGetVolumeStatsResponse {
    pub usage: Vec<VolumeUsage>,
}

/// Request to grow a volume on the node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeExpandVolumeRequest {
    pub volume_id: VolumeId,
    #[serde(default)]
    pub volume_path: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host; 0 means no limit.
    #[serde(default)]
    pub max_volumes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
        assert!(!id.is_empty());
        assert!(VolumeId::default().is_empty());
    }

    #[test]
    fn volume_id_is_a_bare_string_on_the_wire() {
        let json = serde_json::to_string(&VolumeId::from("v1")).expect("serialize");
        assert_eq!(json, "\"v1\"");
    }

    #[test]
    fn stage_request_tolerates_missing_optional_fields() {
        let req: NodeStageVolumeRequest =
            serde_json::from_str(r#"{"volume_id":"v1","staging_target_path":"/staging"}"#)
                .expect("deserialize");
        assert_eq!(req.volume_id.as_str(), "v1");
        assert!(req.volume_capability.is_none());
        assert!(req.secrets.is_empty());
    }

    #[test]
    fn capability_constructors() {
        let cap = VolumeCapability::block(AccessMode::SingleNodeWriter);
        assert!(cap.is_block());
        let cap = VolumeCapability::mount(AccessMode::MultiNodeMultiWriter);
        assert!(!cap.is_block());
        assert_eq!(cap.access_mode, AccessMode::MultiNodeMultiWriter);
    }
}
