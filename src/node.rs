//! CSI Node service trait.
//!
//! The Node service runs on each worker node and performs the local
//! filesystem work that makes an attached volume reachable from containers:
//!
//! 1. **Stage** — locate the device (or share) and mount it at a
//!    node-scoped path, formatting a blank block device first.
//! 2. **Publish** — bind-mount the staged path into each pod-scoped path.
//! 3. **Unpublish** / **Unstage** — tear the mounts down again.
//!
//! The kernel mount table is the only state consulted; each operation is
//! idempotent by inspecting it fresh.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CsiError;
use crate::types::{
    NodeCapability, NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeInfo,
    NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId, VolumeStats,
};

/// Node service — local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at the node-scoped staging path.
    ///
    /// Idempotent: staging an already-staged volume with the same backing
    /// device succeeds without a new mount.
    async fn node_stage_volume(
        &self,
        req: NodeStageVolumeRequest,
        token: &CancellationToken,
    ) -> Result<(), CsiError>;

    /// Unstage a volume: unmount everything at the staging path and remove
    /// the directory.  Idempotent on a non-mount-point.
    async fn node_unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError>;

    /// Publish a staged volume: bind-mount the staging path into the pod
    /// target path.  Re-publishing the same source is a no-op; a target
    /// already bound to a different source fails with already-exists.
    async fn node_publish_volume(
        &self,
        req: NodePublishVolumeRequest,
        token: &CancellationToken,
    ) -> Result<(), CsiError>;

    /// Unpublish a volume: unmount the bind mount and remove the target
    /// directory.  Idempotent.
    async fn node_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError>;

    /// Byte and inode usage of a mounted volume path.
    async fn node_get_volume_stats(
        &self,
        volume_id: &VolumeId,
        volume_path: &str,
        token: &CancellationToken,
    ) -> Result<VolumeStats, CsiError>;

    /// Grow the filesystem behind a mounted path, online.
    async fn node_expand_volume(
        &self,
        req: NodeExpandVolumeRequest,
        token: &CancellationToken,
    ) -> Result<NodeExpandVolumeResponse, CsiError>;

    /// Node-plane RPCs this plugin implements.
    async fn node_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Identity and topology of the node this service runs on.
    async fn node_get_info(&self) -> Result<NodeInfo, CsiError>;
}
