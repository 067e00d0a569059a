//! Controller plane: provisioning, attach arbitration, snapshots, expansion.
//!
//! [`ControllerBackend`] implements [`CsiController`] against any
//! [`CloudApi`].  The cloud inventory is eventually consistent, so every
//! mutating operation polls the inventory back with exponential backoff
//! until it converges or a ceiling is hit.  All idempotency is derived from
//! the inventory itself — nothing is persisted locally.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::cloud::{CloudApi, VolumeCreate};
use crate::context::PublishContext;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::types::{
    CapacityRange, ControllerCapability, ControllerExpandVolumeRequest,
    ControllerExpandVolumeResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, CreateSnapshotRequest, CreateVolumeRequest,
    ListSnapshotsRequest, Snapshot, Topology, TopologyRequirement, Volume, VolumeCapability,
    VolumeClass, VolumeContentSource, VolumeId, VolumeState, DEFAULT_MIN_SIZE_GB, GIB,
    MAX_VOLUMES_PER_NODE,
};

/// Storage-class parameter selecting `block` or `vfs`.
pub const PARAM_STORAGE_TYPE: &str = "storage_type";

/// Storage-class parameter flooring provisioned sizes, in gigabytes.
pub const PARAM_MIN_SIZE_GB: &str = "min_size_gb";

/// Backoff used while polling the inventory for a state transition.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Hard ceiling; hitting it surfaces deadline-exceeded and leaves the
    /// inventory record in place for a later retry to adopt.
    pub ceiling: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            ceiling: Duration::from_secs(300),
        }
    }
}

/// [`CsiController`] implementation over a cloud inventory.
pub struct ControllerBackend<C> {
    cloud: C,
    wait: WaitPolicy,
    /// Per-volume serialization; keyed by volume id (by name while the
    /// volume is still being provisioned).
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<C: CloudApi> ControllerBackend<C> {
    pub fn new(cloud: C) -> Self {
        Self::with_wait_policy(cloud, WaitPolicy::default())
    }

    pub fn with_wait_policy(cloud: C, wait: WaitPolicy) -> Self {
        Self {
            cloud,
            wait,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Poll the inventory until `done` holds for the volume.
    async fn wait_for_volume(
        &self,
        id: &VolumeId,
        what: &str,
        token: &CancellationToken,
        done: impl Fn(&Volume) -> bool,
    ) -> Result<Volume, CsiError> {
        let start = Instant::now();
        let mut delay = self.wait.initial;
        loop {
            let volume = self.get_volume(id, token).await?;
            if done(&volume) {
                return Ok(volume);
            }
            if start.elapsed() >= self.wait.ceiling {
                return Err(CsiError::DeadlineExceeded(format!(
                    "timed out waiting for volume {id} {what}"
                )));
            }
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(CsiError::Canceled(format!("waiting for volume {id} {what}")));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.wait.max);
        }
    }

    /// Poll the inventory until the snapshot is ready.
    async fn wait_for_snapshot(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<Snapshot, CsiError> {
        let start = Instant::now();
        let mut delay = self.wait.initial;
        loop {
            let snapshot = self
                .cloud
                .get_snapshot(id, token)
                .await
                .map_err(CsiError::from)?;
            if snapshot.ready {
                return Ok(snapshot);
            }
            if start.elapsed() >= self.wait.ceiling {
                return Err(CsiError::DeadlineExceeded(format!(
                    "timed out waiting for snapshot {id} to become ready"
                )));
            }
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(CsiError::Canceled(format!("waiting for snapshot {id}")));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.wait.max);
        }
    }

    async fn get_volume(
        &self,
        id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<Volume, CsiError> {
        self.cloud.get_volume(id, token).await.map_err(|e| {
            if e.is_not_found() {
                CsiError::VolumeNotFound(id.to_string())
            } else {
                e.into()
            }
        })
    }

    fn class_from_parameters(
        parameters: &std::collections::HashMap<String, String>,
    ) -> Result<VolumeClass, CsiError> {
        match parameters.get(PARAM_STORAGE_TYPE).map(String::as_str) {
            None | Some("") => Ok(VolumeClass::Block),
            Some(raw) => VolumeClass::parse(raw).ok_or_else(|| {
                CsiError::InvalidArgument(format!("unknown {PARAM_STORAGE_TYPE}: {raw}"))
            }),
        }
    }

    fn validate_capabilities(
        class: VolumeClass,
        capabilities: &[VolumeCapability],
    ) -> Result<(), CsiError> {
        if capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "at least one volume capability must be provided".into(),
            ));
        }
        let supported = class.supported_access_modes();
        for capability in capabilities {
            if !supported.contains(&capability.access_mode) {
                return Err(CsiError::InvalidArgument(format!(
                    "access mode {:?} is not supported by {class} volumes",
                    capability.access_mode
                )));
            }
        }
        Ok(())
    }

    /// First topology preference whose region exists in the cloud.
    fn select_region(
        topology: Option<&TopologyRequirement>,
        regions: &HashSet<String>,
    ) -> Result<String, CsiError> {
        let empty = Vec::new();
        let (preferred, requisite) = topology
            .map(|t| (&t.preferred, &t.requisite))
            .unwrap_or((&empty, &empty));
        preferred
            .iter()
            .chain(requisite.iter())
            .filter_map(Topology::region_segment)
            .find(|r| regions.contains(*r))
            .map(str::to_owned)
            .ok_or_else(|| {
                CsiError::ResourceExhausted(
                    "no requested topology matches an available region".into(),
                )
            })
    }

    /// Clamp the requested range against the storage-class floor.
    ///
    /// Returns `(capacity, required)`: `capacity` is what gets provisioned,
    /// `required` is what an existing volume must already satisfy.
    fn select_capacity(
        range: Option<CapacityRange>,
        parameters: &std::collections::HashMap<String, String>,
    ) -> Result<(u64, u64), CsiError> {
        let floor_gb = match parameters.get(PARAM_MIN_SIZE_GB) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                CsiError::InvalidArgument(format!("invalid {PARAM_MIN_SIZE_GB}: {raw}"))
            })?,
            None => DEFAULT_MIN_SIZE_GB,
        };
        let floor = floor_gb * GIB;

        let range = range.unwrap_or_default();
        let required = range.required_bytes.unwrap_or(floor);
        if let Some(limit) = range.limit_bytes {
            if required > limit {
                return Err(CsiError::OutOfRange(format!(
                    "required {required} bytes exceeds limit {limit}"
                )));
            }
        }

        let capacity = required.max(floor);
        if let Some(limit) = range.limit_bytes {
            if capacity > limit {
                return Err(CsiError::OutOfRange(format!(
                    "storage class minimum of {floor_gb} GB exceeds limit {limit}"
                )));
            }
        }
        Ok((capacity, required))
    }

    async fn validate_content_source(
        &self,
        source: &VolumeContentSource,
        class: VolumeClass,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        match source {
            VolumeContentSource::Snapshot { snapshot_id } => {
                let snapshot = self.cloud.get_snapshot(snapshot_id, token).await.map_err(|e| {
                    if e.is_not_found() {
                        CsiError::SnapshotNotFound(snapshot_id.clone())
                    } else {
                        e.into()
                    }
                })?;
                if !snapshot.ready {
                    return Err(CsiError::FailedPrecondition(format!(
                        "snapshot {snapshot_id} is not ready"
                    )));
                }
            }
            VolumeContentSource::Volume { volume_id } => {
                let origin = self.get_volume(volume_id, token).await?;
                if origin.class != class {
                    return Err(CsiError::InvalidArgument(format!(
                        "clone source {volume_id} is {} but the request asks for {class}",
                        origin.class
                    )));
                }
            }
        }
        Ok(())
    }

    async fn count_block_attachments(
        &self,
        node_id: &str,
        token: &CancellationToken,
    ) -> Result<u64, CsiError> {
        let volumes = self.cloud.list_volumes(None, token).await?;
        Ok(volumes
            .iter()
            .filter(|v| v.class == VolumeClass::Block && v.is_attached_to(node_id))
            .count() as u64)
    }

    fn publish_response(volume: &Volume) -> ControllerPublishVolumeResponse {
        ControllerPublishVolumeResponse {
            publish_context: PublishContext::new(&volume.mount_label, volume.class).to_map(),
        }
    }
}

#[async_trait]
impl<C: CloudApi> CsiController for ControllerBackend<C> {
    #[instrument(skip(self, req, token), fields(name = %req.name))]
    async fn create_volume(
        &self,
        req: CreateVolumeRequest,
        token: &CancellationToken,
    ) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("volume name must be provided".into()));
        }
        let class = Self::class_from_parameters(&req.parameters)?;
        Self::validate_capabilities(class, &req.capabilities)?;
        let (capacity, required) = Self::select_capacity(req.capacity_range, &req.parameters)?;

        let _guard = self.lock_for(&req.name).lock_owned().await;

        let regions: HashSet<String> = self
            .cloud
            .list_regions(token)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let region = Self::select_region(req.topology.as_ref(), &regions)?;

        // Provisioning is idempotent by name: adopt a compatible existing
        // volume, reject an incompatible one.
        let existing = self.cloud.list_volumes(Some(&req.name), token).await?;
        match existing.as_slice() {
            [] => {}
            [volume] => {
                if volume.class == class
                    && volume.region == region
                    && volume.capacity_bytes >= required
                {
                    info!(%volume.id, "adopting existing volume");
                    return Ok(volume.clone());
                }
                return Err(CsiError::AlreadyExists(format!(
                    "volume {} exists with incompatible attributes",
                    req.name
                )));
            }
            many => {
                return Err(CsiError::Internal(format!(
                    "{} volumes share the label {}",
                    many.len(),
                    req.name
                )));
            }
        }

        if let Some(source) = &req.content_source {
            self.validate_content_source(source, class, token).await?;
        }

        let created = self
            .cloud
            .create_volume(
                VolumeCreate {
                    label: req.name.clone(),
                    region,
                    class,
                    capacity_bytes: capacity,
                    source: req.content_source.clone(),
                },
                token,
            )
            .await?;

        let volume = self
            .wait_for_volume(&created.id, "to become available", token, |v| {
                v.state == VolumeState::Available
            })
            .await?;
        info!(%volume.id, %volume.region, capacity_bytes = volume.capacity_bytes, "volume created");
        Ok(volume)
    }

    #[instrument(skip(self, token))]
    async fn delete_volume(
        &self,
        volume_id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        let _guard = self.lock_for(&volume_id.0).lock_owned().await;

        let volume = match self.get_volume(volume_id, token).await {
            Ok(volume) => volume,
            Err(CsiError::VolumeNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if !volume.attachments.is_empty()
            || matches!(volume.state, VolumeState::Attaching | VolumeState::Attached)
        {
            return Err(CsiError::FailedPrecondition(format!(
                "volume {volume_id} is still attached"
            )));
        }

        match self.cloud.delete_volume(volume_id, token).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        info!(%volume_id, "volume deleted");
        Ok(())
    }

    #[instrument(skip(self, req, token), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
        token: &CancellationToken,
    ) -> Result<ControllerPublishVolumeResponse, CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        if req.node_id.is_empty() {
            return Err(CsiError::InvalidArgument("node id must be provided".into()));
        }
        let _guard = self.lock_for(&req.volume_id.0).lock_owned().await;

        let volume = self.get_volume(&req.volume_id, token).await?;
        let instance = self.cloud.get_instance(&req.node_id, token).await?;
        Self::validate_capabilities(volume.class, std::slice::from_ref(&req.capability))?;

        if matches!(volume.state, VolumeState::Detaching | VolumeState::Deleting) {
            return Err(CsiError::Aborted(format!(
                "volume {} is busy ({:?})",
                req.volume_id, volume.state
            )));
        }
        if volume.region != instance.region {
            return Err(CsiError::FailedPrecondition(format!(
                "volume region {} does not match node region {}",
                volume.region, instance.region
            )));
        }

        match volume.class {
            VolumeClass::Block => {
                if let Some(attached) = volume.attached_node_id() {
                    if attached == req.node_id {
                        return Ok(Self::publish_response(&volume));
                    }
                    return Err(CsiError::FailedPrecondition(format!(
                        "volume {} is already attached to node {attached}",
                        req.volume_id
                    )));
                }
                let attached = self.count_block_attachments(&req.node_id, token).await?;
                if attached >= MAX_VOLUMES_PER_NODE {
                    return Err(CsiError::ResourceExhausted(format!(
                        "node {} already has {attached} block volumes attached",
                        req.node_id
                    )));
                }
            }
            VolumeClass::Vfs => {
                if volume.is_attached_to(&req.node_id) {
                    return Ok(Self::publish_response(&volume));
                }
            }
        }

        self.cloud
            .attach_volume(&req.volume_id, &req.node_id, token)
            .await?;
        let volume = self
            .wait_for_volume(&req.volume_id, "to attach", token, |v| {
                v.is_attached_to(&req.node_id) && v.state == VolumeState::Attached
            })
            .await?;
        info!(%volume.id, node_id = %req.node_id, "volume attached");
        Ok(Self::publish_response(&volume))
    }

    #[instrument(skip(self, token))]
    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        let _guard = self.lock_for(&volume_id.0).lock_owned().await;

        let volume = match self.get_volume(volume_id, token).await {
            Ok(volume) => volume,
            Err(CsiError::VolumeNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        match self.cloud.get_instance(node_id, token).await {
            Ok(_) => {}
            // The node may have been deleted with volumes still recorded as
            // attached; detaching anyway lets the orchestrator converge.
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        if !volume.is_attached_to(node_id) {
            return Ok(());
        }

        self.cloud.detach_volume(volume_id, node_id, token).await?;
        self.wait_for_volume(volume_id, "to detach", token, |v| !v.is_attached_to(node_id))
            .await?;
        info!(%volume_id, node_id, "volume detached");
        Ok(())
    }

    #[instrument(skip(self, req, token), fields(name = %req.name, source = %req.source_volume_id))]
    async fn create_snapshot(
        &self,
        req: CreateSnapshotRequest,
        token: &CancellationToken,
    ) -> Result<Snapshot, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("snapshot name must be provided".into()));
        }
        if req.source_volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("source volume id must be provided".into()));
        }
        let _guard = self.lock_for(&req.source_volume_id.0).lock_owned().await;

        let source = self.get_volume(&req.source_volume_id, token).await?;
        if source.class != VolumeClass::Block {
            return Err(CsiError::FailedPrecondition(format!(
                "volume {} is {}; snapshots require a block volume",
                req.source_volume_id, source.class
            )));
        }
        if !matches!(source.state, VolumeState::Available | VolumeState::Attached) {
            return Err(CsiError::FailedPrecondition(format!(
                "volume {} is {:?}; snapshots require an available or attached volume",
                req.source_volume_id, source.state
            )));
        }

        let existing = self.cloud.list_snapshots(Some(&req.name), None, token).await?;
        match existing.as_slice() {
            [] => {}
            [snapshot] => {
                if snapshot.source_volume_id == req.source_volume_id {
                    return Ok(snapshot.clone());
                }
                return Err(CsiError::AlreadyExists(format!(
                    "snapshot {} exists for a different source volume",
                    req.name
                )));
            }
            many => {
                return Err(CsiError::Internal(format!(
                    "{} snapshots share the label {}",
                    many.len(),
                    req.name
                )));
            }
        }

        let created = self
            .cloud
            .create_snapshot(&req.name, &req.source_volume_id, token)
            .await?;
        let snapshot = self.wait_for_snapshot(&created.id, token).await?;
        info!(snapshot_id = %snapshot.id, "snapshot created");
        Ok(snapshot)
    }

    #[instrument(skip(self, token))]
    async fn delete_snapshot(
        &self,
        snapshot_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        if snapshot_id.is_empty() {
            return Err(CsiError::InvalidArgument("snapshot id must be provided".into()));
        }
        match self.cloud.delete_snapshot(snapshot_id, token).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, req, token))]
    async fn list_snapshots(
        &self,
        req: ListSnapshotsRequest,
        token: &CancellationToken,
    ) -> Result<Vec<Snapshot>, CsiError> {
        if let Some(id) = &req.snapshot_id {
            return match self.cloud.get_snapshot(id, token).await {
                Ok(snapshot)
                    if req
                        .source_volume_id
                        .as_ref()
                        .is_none_or(|v| &snapshot.source_volume_id == v) =>
                {
                    Ok(vec![snapshot])
                }
                Ok(_) => Ok(Vec::new()),
                Err(e) if e.is_not_found() => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            };
        }
        self.cloud
            .list_snapshots(None, req.source_volume_id.as_ref(), token)
            .await
            .map_err(CsiError::from)
    }

    #[instrument(skip(self, req, token), fields(volume_id = %req.volume_id))]
    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
        token: &CancellationToken,
    ) -> Result<ControllerExpandVolumeResponse, CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        let required = req
            .capacity_range
            .required_bytes
            .or(req.capacity_range.limit_bytes)
            .ok_or_else(|| {
                CsiError::InvalidArgument("a target capacity must be provided".into())
            })?;
        if let Some(limit) = req.capacity_range.limit_bytes {
            if required > limit {
                return Err(CsiError::OutOfRange(format!(
                    "required {required} bytes exceeds limit {limit}"
                )));
            }
        }
        let _guard = self.lock_for(&req.volume_id.0).lock_owned().await;

        let volume = self.get_volume(&req.volume_id, token).await?;
        if required < volume.capacity_bytes {
            return Err(CsiError::FailedPrecondition(format!(
                "cannot shrink volume {} from {} to {required} bytes",
                req.volume_id, volume.capacity_bytes
            )));
        }
        if required == volume.capacity_bytes {
            return Ok(ControllerExpandVolumeResponse {
                capacity_bytes: required,
                node_expansion_required: true,
            });
        }

        self.cloud
            .resize_volume(&req.volume_id, required, token)
            .await?;
        self.wait_for_volume(&req.volume_id, "to resize", token, |v| {
            v.capacity_bytes >= required && v.state != VolumeState::Resizing
        })
        .await?;
        info!(volume_id = %req.volume_id, capacity_bytes = required, "volume expanded");
        Ok(ControllerExpandVolumeResponse {
            capacity_bytes: required,
            node_expansion_required: true,
        })
    }

    async fn controller_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::PublishUnpublishVolume,
            ControllerCapability::ExpandVolume,
            ControllerCapability::CreateDeleteSnapshot,
            ControllerCapability::ListSnapshots,
            ControllerCapability::CloneVolume,
        ])
    }
}
