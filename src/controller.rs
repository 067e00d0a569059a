//! CSI Controller service trait.
//!
//! The Controller plane owns the volume lifecycle against the cloud
//! inventory: provisioning, deletion, attach/detach arbitration, snapshots,
//! and expansion.  It runs once per cluster and is the sole serializer of
//! attachment changes.
//!
//! Every operation takes a cancellation token; long polls against the
//! eventually-consistent inventory observe it and return a canceled error
//! without leaving partial state the orchestrator cannot converge.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerPublishVolumeRequest, ControllerPublishVolumeResponse, CreateSnapshotRequest,
    CreateVolumeRequest, ListSnapshotsRequest, Snapshot, Volume, VolumeId,
};

/// Controller service — centralized volume lifecycle management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume, idempotently by name.
    ///
    /// Repeating the call with identical inputs returns the existing volume;
    /// an existing volume with incompatible class, region, or capacity fails
    /// with already-exists.
    async fn create_volume(
        &self,
        req: CreateVolumeRequest,
        token: &CancellationToken,
    ) -> Result<Volume, CsiError>;

    /// Delete a volume.  Deleting an absent volume succeeds; deleting an
    /// attached volume fails with failed-precondition.
    async fn delete_volume(
        &self,
        volume_id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<(), CsiError>;

    /// Attach a volume to a node and emit the publish context the Node
    /// plane stages from.
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
        token: &CancellationToken,
    ) -> Result<ControllerPublishVolumeResponse, CsiError>;

    /// Detach a volume from a node.  Not-attached and node-gone are treated
    /// as success.
    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError>;

    /// Snapshot a block volume, idempotently by name.
    async fn create_snapshot(
        &self,
        req: CreateSnapshotRequest,
        token: &CancellationToken,
    ) -> Result<Snapshot, CsiError>;

    /// Delete a snapshot.  Deleting an absent snapshot succeeds.
    async fn delete_snapshot(
        &self,
        snapshot_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError>;

    /// List snapshots, optionally filtered by id or source volume.
    async fn list_snapshots(
        &self,
        req: ListSnapshotsRequest,
        token: &CancellationToken,
    ) -> Result<Vec<Snapshot>, CsiError>;

    /// Grow a volume in the cloud inventory.  The filesystem grow happens
    /// later on the node, so the response always requests node expansion.
    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
        token: &CancellationToken,
    ) -> Result<ControllerExpandVolumeResponse, CsiError>;

    /// Controller-plane RPCs this plugin implements.
    async fn controller_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;
}
