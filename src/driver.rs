//! Composition of the three CSI services into one deployment role.
//!
//! A single binary serves Controller, Node, or both; [`Driver`] owns
//! whichever planes the role enables and answers for all three service
//! traits, failing calls against a plane the role does not run.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::IdentityService;
use crate::config::DriverRole;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::node::CsiNode;
use crate::types::{
    ControllerCapability, ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerPublishVolumeRequest, ControllerPublishVolumeResponse, CreateSnapshotRequest,
    CreateVolumeRequest, ListSnapshotsRequest, NodeCapability, NodeExpandVolumeRequest,
    NodeExpandVolumeResponse, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest,
    PluginCapability, PluginInfo, Snapshot, Volume, VolumeId, VolumeStats,
};

/// The assembled plugin: identity plus the role-enabled planes.
pub struct Driver {
    identity: IdentityService,
    controller: Option<Arc<dyn CsiController>>,
    node: Option<Arc<dyn CsiNode>>,
}

impl Driver {
    pub fn new(role: DriverRole) -> Self {
        Self {
            identity: IdentityService::new(role),
            controller: None,
            node: None,
        }
    }

    pub fn with_controller(mut self, controller: Arc<dyn CsiController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_node(mut self, node: Arc<dyn CsiNode>) -> Self {
        self.node = Some(node);
        self
    }

    fn controller(&self) -> Result<&Arc<dyn CsiController>, CsiError> {
        self.controller.as_ref().ok_or_else(|| {
            CsiError::FailedPrecondition(
                "the controller service is not enabled on this endpoint".into(),
            )
        })
    }

    fn node(&self) -> Result<&Arc<dyn CsiNode>, CsiError> {
        self.node.as_ref().ok_or_else(|| {
            CsiError::FailedPrecondition("the node service is not enabled on this endpoint".into())
        })
    }
}

#[async_trait]
impl CsiIdentity for Driver {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        self.identity.get_plugin_info().await
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        self.identity.probe().await
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        self.identity.get_plugin_capabilities().await
    }
}

#[async_trait]
impl CsiController for Driver {
    async fn create_volume(
        &self,
        req: CreateVolumeRequest,
        token: &CancellationToken,
    ) -> Result<Volume, CsiError> {
        self.controller()?.create_volume(req, token).await
    }

    async fn delete_volume(
        &self,
        volume_id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        self.controller()?.delete_volume(volume_id, token).await
    }

    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
        token: &CancellationToken,
    ) -> Result<ControllerPublishVolumeResponse, CsiError> {
        self.controller()?.controller_publish_volume(req, token).await
    }

    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        self.controller()?
            .controller_unpublish_volume(volume_id, node_id, token)
            .await
    }

    async fn create_snapshot(
        &self,
        req: CreateSnapshotRequest,
        token: &CancellationToken,
    ) -> Result<Snapshot, CsiError> {
        self.controller()?.create_snapshot(req, token).await
    }

    async fn delete_snapshot(
        &self,
        snapshot_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        self.controller()?.delete_snapshot(snapshot_id, token).await
    }

    async fn list_snapshots(
        &self,
        req: ListSnapshotsRequest,
        token: &CancellationToken,
    ) -> Result<Vec<Snapshot>, CsiError> {
        self.controller()?.list_snapshots(req, token).await
    }

    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
        token: &CancellationToken,
    ) -> Result<ControllerExpandVolumeResponse, CsiError> {
        self.controller()?.controller_expand_volume(req, token).await
    }

    async fn controller_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        self.controller()?.controller_capabilities().await
    }
}

#[async_trait]
impl CsiNode for Driver {
    async fn node_stage_volume(
        &self,
        req: NodeStageVolumeRequest,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        self.node()?.node_stage_volume(req, token).await
    }

    async fn node_unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        self.node()?
            .node_unstage_volume(volume_id, staging_target_path, token)
            .await
    }

    async fn node_publish_volume(
        &self,
        req: NodePublishVolumeRequest,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        self.node()?.node_publish_volume(req, token).await
    }

    async fn node_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        self.node()?
            .node_unpublish_volume(volume_id, target_path, token)
            .await
    }

    async fn node_get_volume_stats(
        &self,
        volume_id: &VolumeId,
        volume_path: &str,
        token: &CancellationToken,
    ) -> Result<VolumeStats, CsiError> {
        self.node()?
            .node_get_volume_stats(volume_id, volume_path, token)
            .await
    }

    async fn node_expand_volume(
        &self,
        req: NodeExpandVolumeRequest,
        token: &CancellationToken,
    ) -> Result<NodeExpandVolumeResponse, CsiError> {
        self.node()?.node_expand_volume(req, token).await
    }

    async fn node_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        self.node()?.node_capabilities().await
    }

    async fn node_get_info(&self) -> Result<NodeInfo, CsiError> {
        self.node()?.node_get_info().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn disabled_planes_fail_cleanly() {
        let driver = Driver::new(DriverRole::Node);
        let token = CancellationToken::new();

        let err = driver
            .delete_volume(&VolumeId("vol-1".into()), &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);

        let err = driver.node_get_info().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);

        // Identity always answers.
        assert!(driver.probe().await.unwrap());
    }
}
