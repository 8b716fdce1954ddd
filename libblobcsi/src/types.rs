//! Core CSI types: volume IDs, capabilities, node requests and stats.
//!
//! These types form the data model shared by the CSI traits, the transport
//! layer and the driver. They are all [`Serialize`]/[`Deserialize`] so they
//! can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::CsiError;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume as handed over by the caller.
///
/// The structured view of the ID lives in [`crate::volume_id::VolumeIdentity`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
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

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// How a blob container is presented on the node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// FUSE mount through the blobfuse helper. Needs key material.
    #[default]
    Fuse,
    /// Kernel NFSv3 mount. Authenticated at the network layer.
    Nfs,
}

impl Protocol {
    /// Parse the `protocol` volume attribute. An empty value selects FUSE.
    pub fn parse(value: &str) -> Result<Self, CsiError> {
        match value {
            "" | "fuse" => Ok(Self::Fuse),
            "nfs" => Ok(Self::Nfs),
            other => Err(CsiError::invalid(format!(
                "protocol({other}) is not supported, supported protocol list: [fuse nfs]"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fuse => "fuse",
            Self::Nfs => "nfs",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Mount flags supplied by the caller, e.g. `"--file-cache-timeout-in-seconds=120"`.
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteMany,
            mount_flags: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to stage (first-phase mount) a volume on a node.
///
/// `Debug` is implemented by hand so that secrets never reach the logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage, `<rg>#<account>#<container>#<discriminator>`.
    pub volume_id: VolumeId,
    /// Node-local staging mount point.
    pub staging_target_path: String,
    /// Requested capability. Required.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Volume attributes carried from provisioning.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Caller-supplied secrets.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

impl fmt::Debug for NodeStageVolumeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStageVolumeRequest")
            .field("volume_id", &self.volume_id)
            .field("staging_target_path", &self.staging_target_path)
            .field("volume_capability", &self.volume_capability)
            .field("volume_context", &self.volume_context)
            .field("secrets", &format_args!("<{} redacted>", self.secrets.len()))
            .finish()
    }
}

/// Request to publish (bind-mount) a staged volume into a consumer path.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// The staging mount point (source of the bind mount).
    #[serde(default)]
    pub staging_target_path: String,
    /// Consumer-specific target path.
    pub target_path: String,
    /// Requested capability. Required.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the bind mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Volume attributes; ephemeral inline volumes are staged from here.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Caller-supplied secrets, used by ephemeral inline volumes.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

impl fmt::Debug for NodePublishVolumeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePublishVolumeRequest")
            .field("volume_id", &self.volume_id)
            .field("staging_target_path", &self.staging_target_path)
            .field("target_path", &self.target_path)
            .field("volume_capability", &self.volume_capability)
            .field("read_only", &self.read_only)
            .field("volume_context", &self.volume_context)
            .field("secrets", &format_args!("<{} redacted>", self.secrets.len()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Unit of a [`VolumeUsage`] entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsageUnit {
    Bytes,
    Inodes,
}

/// One usage sample of a mounted volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeUsage {
    pub unit: UsageUnit,
    pub available: u64,
    pub total: u64,
    pub used: u64,
}

/// Usage of a mounted volume, one entry per [`UsageUnit`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeStats {
    pub usage: Vec<VolumeUsage>,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"blob.csi.azure.com"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// RPCs the node service implements beyond the mandatory ones.
/// Plugin-level capabilities advertised by the identity service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    ControllerService,
    VolumeAccessibilityConstraints,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
    GetVolumeStats,
    SingleNodeMultiWriter,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
}
