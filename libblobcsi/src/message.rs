//! Messages carried over the QUIC transport.
//!
//! Each QUIC bi-stream carries exactly one request followed by one response.
//! [`CsiMessage`] is the node RPC envelope; [`MountRequest`] and
//! [`MountResponse`] travel between the plugin and the mount proxy.

use serde::{Deserialize, Serialize};

use crate::credentials::redact_env;
use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for node RPCs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    StageVolume(NodeStageVolumeRequest),
    UnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    PublishVolume(NodePublishVolumeRequest),
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    GetVolumeStats {
        volume_id: VolumeId,
        volume_path: String,
    },
    GetNodeCapabilities,
    GetNodeInfo,

    Probe,
    GetPluginInfo,
    GetPluginCapabilities,

    // ----- Responses -------------------------------------------------------
    VolumeStatsResponse(VolumeStats),
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    NodeInfoResponse(NodeInfo),
    PluginInfoResponse(PluginInfo),
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    ProbeResult(bool),
    /// Success without payload.
    Ok,
    Error(CsiError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StageVolume(req) => write!(f, "StageVolume({})", req.volume_id),
            Self::UnstageVolume { volume_id, .. } => write!(f, "UnstageVolume({volume_id})"),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume { volume_id, .. } => write!(f, "UnpublishVolume({volume_id})"),
            Self::GetVolumeStats { volume_id, .. } => write!(f, "GetVolumeStats({volume_id})"),
            Self::GetNodeCapabilities => f.write_str("GetNodeCapabilities"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::VolumeStatsResponse(stats) => {
                write!(f, "VolumeStats(entries={})", stats.usage.len())
            }
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::ProbeResult(ok) => write!(f, "ProbeResult({ok})"),
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}

/// A blobfuse invocation forwarded to the mount proxy.
#[derive(Clone, Serialize, Deserialize)]
pub struct MountRequest {
    pub args: String,
    pub auth_env: Vec<String>,
}

impl std::fmt::Debug for MountRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountRequest")
            .field("args", &self.args)
            .field("auth_env", &redact_env(&self.auth_env))
            .finish()
    }
}

impl std::fmt::Display for MountRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mount({})", self.args)
    }
}

/// Outcome of a proxied mount. `error` is set when the helper failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountResponse {
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl std::fmt::Display for MountResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(e) => write!(f, "MountFailed({e})"),
            None => f.write_str("Mounted"),
        }
    }
}
