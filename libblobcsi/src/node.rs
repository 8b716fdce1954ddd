//! Per-node volume operations.
//!
//! A blob container is first staged at a node-global path, then published
//! into each Pod with a bind mount. Unpublish and unstage undo the two steps
//! in reverse order.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId,
    VolumeStats,
};

#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at `staging_target_path`.
    ///
    /// Idempotent: staging an already-mounted, healthy target succeeds
    /// without mounting again.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Unmount and remove the staging path. A target that is not mounted, or
    /// does not exist, is not an error.
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Bind-mount the staging path into `target_path`, or for ephemeral
    /// volumes stage directly at `target_path`.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unmount and remove `target_path`. Idempotent.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Byte and inode usage of the filesystem mounted at `volume_path`.
    async fn get_volume_stats(
        &self,
        volume_id: &VolumeId,
        volume_path: &str,
    ) -> Result<VolumeStats, CsiError>;

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}
