//! CSI protocol messages transmitted over the plugin socket.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the orchestrator side and the plugin.  On the
//! wire each message is wrapped in an [`Envelope`] that carries a request id,
//! so several requests can be in flight on one connection and their
//! responses may come back in any order.

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI requests and responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Identity requests ----------------------------------------------
    /// Query plugin info.
    GetPluginInfo,
    /// Readiness probe.
    Probe,
    /// Query plugin capabilities.
    GetPluginCapabilities,

    // ----- Controller requests --------------------------------------------
    ControllerGetCapabilities,
    CreateVolume(CreateVolumeRequest),
    DeleteVolume(DeleteVolumeRequest),
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesRequest),
    ControllerExpandVolume(ControllerExpandVolumeRequest),

    // ----- Node requests ---------------------------------------------------
    NodeStageVolume(NodeStageVolumeRequest),
    NodeUnstageVolume(NodeUnstageVolumeRequest),
    NodePublishVolume(NodePublishVolumeRequest),
    NodeUnpublishVolume(NodeUnpublishVolumeRequest),
    NodeGetVolumeStats(NodeGetVolumeStatsRequest),
    NodeExpandVolume(NodeExpandVolumeRequest),
    NodeGetCapabilities,
    NodeGetInfo,

    // ----- Responses -------------------------------------------------------
    PluginInfoResponse(PluginInfo),
    ProbeResult(bool),
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    ControllerCapabilitiesResponse(Vec<ControllerServiceCapability>),
    VolumeCreated(Volume),
    CapabilitiesValidated(ValidateVolumeCapabilitiesResponse),
    /// New capacity in bytes after an expansion.
    VolumeExpanded(u64),
    VolumeStats(NodeGetVolumeStatsResponse),
    NodeCapabilitiesResponse(Vec<NodeServiceCapability>),
    NodeInfoResponse(NodeInfo),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(CsiError),
}

impl CsiMessage {
    /// Protocol method name of a request variant; `None` for responses.
    pub fn method(&self) -> Option<&'static str> {
        let name = match self {
            Self::GetPluginInfo => "GetPluginInfo",
            Self::Probe => "Probe",
            Self::GetPluginCapabilities => "GetPluginCapabilities",
            Self::ControllerGetCapabilities => "ControllerGetCapabilities",
            Self::CreateVolume(_) => "CreateVolume",
            Self::DeleteVolume(_) => "DeleteVolume",
            Self::ValidateVolumeCapabilities(_) => "ValidateVolumeCapabilities",
            Self::ControllerExpandVolume(_) => "ControllerExpandVolume",
            Self::NodeStageVolume(_) => "NodeStageVolume",
            Self::NodeUnstageVolume(_) => "NodeUnstageVolume",
            Self::NodePublishVolume(_) => "NodePublishVolume",
            Self::NodeUnpublishVolume(_) => "NodeUnpublishVolume",
            Self::NodeGetVolumeStats(_) => "NodeGetVolumeStats",
            Self::NodeExpandVolume(_) => "NodeExpandVolume",
            Self::NodeGetCapabilities => "NodeGetCapabilities",
            Self::NodeGetInfo => "NodeGetInfo",
            _ => return None,
        };
        Some(name)
    }
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(req) => write!(f, "DeleteVolume({})", req.volume_id),
            Self::ValidateVolumeCapabilities(req) => {
                write!(f, "ValidateVolumeCapabilities({})", req.volume_id)
            }
            Self::ControllerExpandVolume(req) => {
                write!(f, "ControllerExpandVolume({})", req.volume_id)
            }
            Self::NodeStageVolume(req) => write!(f, "NodeStageVolume({})", req.volume_id),
            Self::NodeUnstageVolume(req) => write!(f, "NodeUnstageVolume({})", req.volume_id),
            Self::NodePublishVolume(req) => write!(f, "NodePublishVolume({})", req.volume_id),
            Self::NodeUnpublishVolume(req) => {
                write!(f, "NodeUnpublishVolume({})", req.volume_id)
            }
            Self::NodeGetVolumeStats(req) => write!(f, "NodeGetVolumeStats({})", req.volume_id),
            Self::NodeExpandVolume(req) => write!(f, "NodeExpandVolume({})", req.volume_id),
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::ProbeResult(ready) => write!(f, "ProbeResult({ready})"),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::CapabilitiesValidated(resp) => {
                write!(f, "CapabilitiesValidated({})", resp.confirmed.is_some())
            }
            Self::VolumeExpanded(bytes) => write!(f, "VolumeExpanded({bytes})"),
            Self::VolumeStats(resp) => write!(f, "VolumeStats(entries={})", resp.usage.len()),
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({e})"),
            other => f.write_str(other.method().unwrap_or("Unknown")),
        }
    }
}

/// Wire frame: one [`CsiMessage`] tagged with the id of the request it
/// belongs to.  Responses echo the id of their request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub message: CsiMessage,
}

impl Envelope {
    pub fn new(id: u64, message: CsiMessage) -> Self {
        Self { id, message }
    }
}
