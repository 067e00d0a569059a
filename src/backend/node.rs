//! Node plane: device discovery, staging, publishing, stats, and resize.
//!
//! [`NodeBackend`] implements [`CsiNode`] over a [`Mounter`] and a
//! [`DeviceLocator`].  The kernel mount table is the only source of truth:
//! every operation inspects it fresh and short-circuits when the desired
//! state already holds, so orchestrator retries converge after crashes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::context::PublishContext;
use crate::device::DeviceLocator;
use crate::error::CsiError;
use crate::mount::Mounter;
use crate::node::CsiNode;
use crate::types::{
    NodeCapability, NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeInfo,
    NodePublishVolumeRequest, NodeStageVolumeRequest, Topology, Usage, VolumeClass, VolumeId,
    VolumeStats, MAX_VOLUMES_PER_NODE, MKDIR_MODE, VIRTIOFS_FS_TYPE,
};

/// [`CsiNode`] implementation over the local kernel.
pub struct NodeBackend<M, D> {
    mounter: M,
    locator: D,
    node_id: String,
    region: String,
    /// Serializes stage/unstage per staging path and publish/unpublish per
    /// target path; different paths proceed in parallel.
    path_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl<M: Mounter, D: DeviceLocator> NodeBackend<M, D> {
    pub fn new(
        mounter: M,
        locator: D,
        node_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            mounter,
            locator,
            node_id: node_id.into(),
            region: region.into(),
            path_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.path_locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    async fn create_dir(path: &Path) -> Result<(), CsiError> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true).mode(MKDIR_MODE);
        builder.create(path).await.map_err(|e| {
            CsiError::Internal(format!("cannot create directory {}: {e}", path.display()))
        })
    }

    /// Whether `staging` is already mounted from `source`.
    ///
    /// A probe failure is logged and treated as "not staged": the mount
    /// attempt that follows gives the definitive answer.
    async fn already_staged(&self, staging: &Path, source: &str) -> bool {
        match self.mounter.is_mount_point(staging).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!(path = %staging.display(), error = %e, "could not check staging path");
                return false;
            }
        }
        match self.mounter.device_from_mount(staging).await {
            Ok((device, references)) => {
                debug!(
                    path = %staging.display(),
                    device = %device,
                    references,
                    "existing mount at staging path",
                );
                device == source
            }
            Err(e) => {
                warn!(path = %staging.display(), error = %e, "could not inspect existing mount");
                false
            }
        }
    }

    async fn stage_block(
        &self,
        req: &NodeStageVolumeRequest,
        ctx: &PublishContext,
        staging: &Path,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        let source = self.locator.link_by_serial(&ctx.mount_vol_name, token).await?;
        let source = source.to_string_lossy().into_owned();

        if self.already_staged(staging, &source).await {
            info!(volume_id = %req.volume_id, "block device is already staged");
            return Ok(());
        }

        let fs_type = req.capability.fs_type_or_default(VolumeClass::Block);
        self.mounter
            .format_and_mount(&source, staging, fs_type, &req.capability.mount_flags)
            .await?;

        // Absorb an offline grow that happened while the volume was
        // detached.
        match self.mounter.need_resize(&source, staging).await {
            Ok(false) => {}
            Ok(true) => {
                info!(volume_id = %req.volume_id, "growing filesystem after stage");
                self.mounter.resize(&source, staging).await?;
            }
            Err(e) => {
                return Err(CsiError::Internal(format!(
                    "could not determine if volume {} needs a resize: {e}",
                    req.volume_id
                )));
            }
        }
        Ok(())
    }

    async fn stage_vfs(
        &self,
        req: &NodeStageVolumeRequest,
        ctx: &PublishContext,
        staging: &Path,
    ) -> Result<(), CsiError> {
        let source = ctx.mount_vol_name.as_str();
        if self.already_staged(staging, source).await {
            info!(volume_id = %req.volume_id, "vfs share is already staged");
            return Ok(());
        }
        self.mounter
            .mount(source, staging, VIRTIOFS_FS_TYPE, &[])
            .await
    }
}

#[async_trait]
impl<M: Mounter, D: DeviceLocator> CsiNode for NodeBackend<M, D> {
    #[instrument(skip(self, req, token), fields(volume_id = %req.volume_id, target = %req.staging_target_path))]
    async fn node_stage_volume(
        &self,
        req: NodeStageVolumeRequest,
        token: &CancellationToken,
    ) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "staging target path must be provided".into(),
            ));
        }
        let ctx = PublishContext::from_map(&req.publish_context)?;

        let staging = PathBuf::from(&req.staging_target_path);
        let _guard = self.lock_for(&staging).lock_owned().await;

        Self::create_dir(&staging).await?;

        match ctx.storage_type {
            VolumeClass::Block => self.stage_block(&req, &ctx, &staging, token).await?,
            VolumeClass::Vfs => self.stage_vfs(&req, &ctx, &staging).await?,
        }
        info!("volume staged");
        Ok(())
    }

    #[instrument(skip(self, _token))]
    async fn node_unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
        _token: &CancellationToken,
    ) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        if staging_target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "staging target path must be provided".into(),
            ));
        }
        let staging = PathBuf::from(staging_target_path);
        let _guard = self.lock_for(&staging).lock_owned().await;

        self.mounter.cleanup_mount_point(&staging, true).await?;
        info!("volume unstaged");
        Ok(())
    }

    #[instrument(skip(self, req, _token), fields(volume_id = %req.volume_id, target = %req.target_path))]
    async fn node_publish_volume(
        &self,
        req: NodePublishVolumeRequest,
        _token: &CancellationToken,
    ) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "staging target path must be provided".into(),
            ));
        }
        if req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path must be provided".into()));
        }

        let target = PathBuf::from(&req.target_path);
        let _guard = self.lock_for(&target).lock_owned().await;

        Self::create_dir(&target).await?;

        if self.mounter.is_mount_point(&target).await? {
            let (bound, _) = self.mounter.device_from_mount(&target).await?;
            let staged = self
                .mounter
                .device_from_mount(Path::new(&req.staging_target_path))
                .await
                .ok()
                .map(|(device, _)| device);
            if staged.as_deref() == Some(bound.as_str()) {
                info!("volume is already published");
                return Ok(());
            }
            return Err(CsiError::AlreadyExists(format!(
                "target {} is already bound to {bound}",
                req.target_path
            )));
        }

        let mut options = vec!["bind".to_owned()];
        if req.readonly {
            options.push("ro".to_owned());
        }
        options.extend(req.capability.mount_flags.iter().cloned());

        // Informational for a bind mount, passed through for kernel-side
        // sanity.
        let fs_type = req.capability.fs_type_or_default(VolumeClass::Block);
        self.mounter
            .mount(&req.staging_target_path, &target, fs_type, &options)
            .await?;
        info!("volume published");
        Ok(())
    }

    #[instrument(skip(self, _token))]
    async fn node_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
        _token: &CancellationToken,
    ) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        if target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path must be provided".into()));
        }
        let target = PathBuf::from(target_path);
        let _guard = self.lock_for(&target).lock_owned().await;

        self.mounter.cleanup_mount_point(&target, true).await?;
        info!("volume unpublished");
        Ok(())
    }

    #[instrument(skip(self, _token))]
    async fn node_get_volume_stats(
        &self,
        volume_id: &VolumeId,
        volume_path: &str,
        _token: &CancellationToken,
    ) -> Result<VolumeStats, CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        if volume_path.is_empty() {
            return Err(CsiError::InvalidArgument("volume path must be provided".into()));
        }

        let path = Path::new(volume_path);
        match tokio::fs::metadata(path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CsiError::NotFound(format!("volume path {volume_path}")));
            }
            Err(e) => {
                return Err(CsiError::Internal(format!("stat {volume_path}: {e}")));
            }
        }

        let stat = nix::sys::statvfs::statvfs(path)
            .map_err(|e| CsiError::Internal(format!("statvfs {volume_path}: {e}")))?;

        let fragment = stat.fragment_size() as u64;
        let bytes = Usage {
            available: stat.blocks_available() as u64 * fragment,
            total: stat.blocks() as u64 * fragment,
            used: (stat.blocks() as u64).saturating_sub(stat.blocks_free() as u64) * fragment,
        };
        let inodes = Usage {
            available: stat.files_free() as u64,
            total: stat.files() as u64,
            used: (stat.files() as u64).saturating_sub(stat.files_free() as u64),
        };

        debug!(
            bytes_available = bytes.available,
            bytes_total = bytes.total,
            bytes_used = bytes.used,
            inodes_total = inodes.total,
            "volume statistics retrieved",
        );
        Ok(VolumeStats { bytes, inodes })
    }

    #[instrument(skip(self, req, _token), fields(volume_id = %req.volume_id, path = %req.volume_path))]
    async fn node_expand_volume(
        &self,
        req: NodeExpandVolumeRequest,
        _token: &CancellationToken,
    ) -> Result<NodeExpandVolumeResponse, CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id must be provided".into()));
        }
        if req.volume_path.is_empty() {
            return Err(CsiError::InvalidArgument("volume path must be provided".into()));
        }
        let required = req
            .capacity_range
            .required_bytes
            .or(req.capacity_range.limit_bytes)
            .ok_or_else(|| {
                CsiError::InvalidArgument("a target capacity must be provided".into())
            })?;

        let path = Path::new(&req.volume_path);
        let (device, _) = self.mounter.device_from_mount(path).await?;
        info!(device = %device, "growing filesystem");
        self.mounter.resize(&device, path).await?;

        // Reports the size the caller asked for; the grow is not
        // remeasured.
        Ok(NodeExpandVolumeResponse {
            capacity_bytes: required,
        })
    }

    async fn node_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![
            NodeCapability::StageUnstageVolume,
            NodeCapability::GetVolumeStats,
            NodeCapability::ExpandVolume,
        ])
    }

    async fn node_get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.node_id.clone(),
            max_volumes: MAX_VOLUMES_PER_NODE,
            accessible_topology: Some(Topology::region(self.region.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{MOUNT_VOL_NAME_KEY, STORAGE_TYPE_KEY};
    use crate::device::fake::FakeLocator;
    use crate::error::ErrorCode;
    use crate::mount::fake::FakeMounter;
    use crate::types::{CapacityRange, VolumeCapability, GIB};
    use std::collections::HashMap;

    fn backend() -> NodeBackend<FakeMounter, FakeLocator> {
        NodeBackend::new(FakeMounter::new(), FakeLocator::new(), "node-a", "ewr")
    }

    fn stage_request(label: &str, class: VolumeClass, staging: &str) -> NodeStageVolumeRequest {
        NodeStageVolumeRequest {
            volume_id: VolumeId("vol-1".into()),
            staging_target_path: staging.into(),
            capability: VolumeCapability::default(),
            publish_context: PublishContext::new(label, class).to_map(),
        }
    }

    fn publish_request(staging: &str, target: &str) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: VolumeId("vol-1".into()),
            staging_target_path: staging.into(),
            target_path: target.into(),
            capability: VolumeCapability::default(),
            readonly: false,
        }
    }

    #[tokio::test]
    async fn stage_block_formats_and_mounts_the_device() {
        let backend = backend();
        let token = CancellationToken::new();

        backend
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap();

        let expected = FakeLocator::expected_path("serial01");
        let mounts = backend.mounter.mounts();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].source, expected.to_string_lossy());
        assert_eq!(mounts[0].target, PathBuf::from("/stage/v1"));
        assert_eq!(mounts[0].fs_type, "ext4");
        assert_eq!(
            backend.mounter.formatted_devices(),
            vec![expected.to_string_lossy().into_owned()]
        );
    }

    #[tokio::test]
    async fn restage_is_a_no_op() {
        let backend = backend();
        let token = CancellationToken::new();
        let request = stage_request("serial01", VolumeClass::Block, "/stage/v1");

        backend.node_stage_volume(request.clone(), &token).await.unwrap();
        backend.node_stage_volume(request, &token).await.unwrap();

        assert_eq!(backend.mounter.mounts().len(), 1);
    }

    #[tokio::test]
    async fn stage_without_storage_type_defaults_to_block() {
        let backend = backend();
        let token = CancellationToken::new();

        let mut request = stage_request("serial01", VolumeClass::Block, "/stage/v1");
        request.publish_context =
            HashMap::from([(MOUNT_VOL_NAME_KEY.to_owned(), "serial01".to_owned())]);
        backend.node_stage_volume(request, &token).await.unwrap();

        let mounts = backend.mounter.mounts();
        assert_eq!(
            mounts[0].source,
            FakeLocator::expected_path("serial01").to_string_lossy()
        );
    }

    #[tokio::test]
    async fn stage_rejects_unknown_storage_type() {
        let backend = backend();
        let token = CancellationToken::new();

        let mut request = stage_request("serial01", VolumeClass::Block, "/stage/v1");
        request
            .publish_context
            .insert(STORAGE_TYPE_KEY.to_owned(), "tape".to_owned());
        let err = backend.node_stage_volume(request, &token).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(backend.mounter.mounts().is_empty());
    }

    #[tokio::test]
    async fn stage_vfs_mounts_the_share_by_name() {
        let backend = backend();
        let token = CancellationToken::new();
        let request = stage_request("share01", VolumeClass::Vfs, "/stage/shared");

        backend.node_stage_volume(request.clone(), &token).await.unwrap();
        backend.node_stage_volume(request, &token).await.unwrap();

        let mounts = backend.mounter.mounts();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].source, "share01");
        assert_eq!(mounts[0].fs_type, "virtiofs");
        assert!(mounts[0].options.is_empty());
        assert!(backend.mounter.formatted_devices().is_empty());
    }

    #[tokio::test]
    async fn stage_fails_when_the_device_never_appears() {
        let backend = backend();
        backend.locator.mark_missing("serial01");
        let token = CancellationToken::new();

        let err = backend
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(backend.mounter.mounts().is_empty());
    }

    #[tokio::test]
    async fn stage_grows_a_stale_filesystem() {
        let backend = backend();
        backend.mounter.set_need_resize(true);
        let token = CancellationToken::new();

        backend
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap();
        assert_eq!(backend.mounter.resize_calls().len(), 1);

        // The defensive grow applies to block volumes only.
        backend
            .node_stage_volume(stage_request("share01", VolumeClass::Vfs, "/stage/shared"), &token)
            .await
            .unwrap();
        assert_eq!(backend.mounter.resize_calls().len(), 1);
    }

    #[tokio::test]
    async fn stage_then_unstage_round_trips() {
        let backend = backend();
        let token = CancellationToken::new();
        let staging = Path::new("/stage/v1");

        backend
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap();
        assert!(backend.mounter.is_mount_point(staging).await.unwrap());

        backend
            .node_unstage_volume(&VolumeId("vol-1".into()), "/stage/v1", &token)
            .await
            .unwrap();
        assert!(!backend.mounter.is_mount_point(staging).await.unwrap());

        // Unstaging an already-unstaged path succeeds.
        backend
            .node_unstage_volume(&VolumeId("vol-1".into()), "/stage/v1", &token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publish_bind_mounts_and_is_idempotent() {
        let backend = backend();
        let token = CancellationToken::new();

        backend
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap();
        backend
            .node_publish_volume(publish_request("/stage/v1", "/pods/p1/vol"), &token)
            .await
            .unwrap();

        let target_mounts = backend.mounter.mounts_at(Path::new("/pods/p1/vol"));
        assert_eq!(target_mounts.len(), 1);
        assert!(target_mounts[0].options.contains(&"bind".to_owned()));
        // The bind target surfaces the staged device.
        assert_eq!(
            target_mounts[0].source,
            FakeLocator::expected_path("serial01").to_string_lossy()
        );

        backend
            .node_publish_volume(publish_request("/stage/v1", "/pods/p1/vol"), &token)
            .await
            .unwrap();
        assert_eq!(backend.mounter.mounts_at(Path::new("/pods/p1/vol")).len(), 1);
    }

    #[tokio::test]
    async fn publish_readonly_adds_the_ro_flag() {
        let backend = backend();
        let token = CancellationToken::new();

        backend
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap();
        let mut request = publish_request("/stage/v1", "/pods/p1/vol");
        request.readonly = true;
        backend.node_publish_volume(request, &token).await.unwrap();

        let mounts = backend.mounter.mounts_at(Path::new("/pods/p1/vol"));
        assert!(mounts[0].options.contains(&"ro".to_owned()));
    }

    #[tokio::test]
    async fn publish_conflicting_source_is_already_exists() {
        let backend = backend();
        let token = CancellationToken::new();

        backend
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap();
        let mut other = stage_request("serial02", VolumeClass::Block, "/stage/v2");
        other.volume_id = VolumeId("vol-2".into());
        backend.node_stage_volume(other, &token).await.unwrap();

        backend
            .node_publish_volume(publish_request("/stage/v1", "/pods/p1/vol"), &token)
            .await
            .unwrap();
        let err = backend
            .node_publish_volume(publish_request("/stage/v2", "/pods/p1/vol"), &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
    }

    #[tokio::test]
    async fn unpublish_is_idempotent() {
        let backend = backend();
        let token = CancellationToken::new();

        backend
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap();
        backend
            .node_publish_volume(publish_request("/stage/v1", "/pods/p1/vol"), &token)
            .await
            .unwrap();

        backend
            .node_unpublish_volume(&VolumeId("vol-1".into()), "/pods/p1/vol", &token)
            .await
            .unwrap();
        assert!(backend.mounter.mounts_at(Path::new("/pods/p1/vol")).is_empty());
        backend
            .node_unpublish_volume(&VolumeId("vol-1".into()), "/pods/p1/vol", &token)
            .await
            .unwrap();

        // The staging mount is untouched.
        assert!(backend.mounter.is_mount_point(Path::new("/stage/v1")).await.unwrap());
    }

    #[tokio::test]
    async fn publish_survives_a_plugin_restart() {
        let mounter = FakeMounter::new();
        let locator = FakeLocator::new();
        let token = CancellationToken::new();

        let before = NodeBackend::new(mounter.clone(), locator.clone(), "node-a", "ewr");
        before
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap();

        // The process restarts between stage and publish; the retry lands
        // on a fresh backend over the same kernel state.
        let after = NodeBackend::new(mounter.clone(), locator, "node-a", "ewr");
        after
            .node_publish_volume(publish_request("/stage/v1", "/pods/p1/vol"), &token)
            .await
            .unwrap();
        after
            .node_publish_volume(publish_request("/stage/v1", "/pods/p1/vol"), &token)
            .await
            .unwrap();
        assert_eq!(mounter.mounts_at(Path::new("/pods/p1/vol")).len(), 1);
    }

    #[tokio::test]
    async fn stats_report_real_filesystem_usage() {
        let backend = backend();
        let token = CancellationToken::new();
        let tmp = tempfile::tempdir().unwrap();

        let stats = backend
            .node_get_volume_stats(
                &VolumeId("vol-1".into()),
                tmp.path().to_str().unwrap(),
                &token,
            )
            .await
            .unwrap();

        assert!(stats.bytes.total > 0);
        assert!(stats.bytes.used + stats.bytes.available <= stats.bytes.total);
        assert!(stats.inodes.used <= stats.inodes.total);
    }

    #[tokio::test]
    async fn stats_on_a_missing_path_is_not_found() {
        let backend = backend();
        let token = CancellationToken::new();

        let err = backend
            .node_get_volume_stats(&VolumeId("vol-1".into()), "/no/such/path", &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn expand_resolves_the_device_and_reports_the_request() {
        let backend = backend();
        let token = CancellationToken::new();

        backend
            .node_stage_volume(stage_request("serial01", VolumeClass::Block, "/stage/v1"), &token)
            .await
            .unwrap();

        let response = backend
            .node_expand_volume(
                NodeExpandVolumeRequest {
                    volume_id: VolumeId("vol-1".into()),
                    volume_path: "/stage/v1".into(),
                    capacity_range: CapacityRange {
                        required_bytes: Some(20 * GIB),
                        limit_bytes: None,
                    },
                },
                &token,
            )
            .await
            .unwrap();

        assert_eq!(response.capacity_bytes, 20 * GIB);
        let calls = backend.mounter.resize_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            FakeLocator::expected_path("serial01").to_string_lossy()
        );
        assert_eq!(calls[0].1, PathBuf::from("/stage/v1"));
    }

    #[tokio::test]
    async fn expand_requires_a_mounted_path_and_a_capacity() {
        let backend = backend();
        let token = CancellationToken::new();

        let err = backend
            .node_expand_volume(
                NodeExpandVolumeRequest {
                    volume_id: VolumeId("vol-1".into()),
                    volume_path: "/not/mounted".into(),
                    capacity_range: CapacityRange {
                        required_bytes: Some(20 * GIB),
                        limit_bytes: None,
                    },
                },
                &token,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = backend
            .node_expand_volume(
                NodeExpandVolumeRequest {
                    volume_id: VolumeId("vol-1".into()),
                    volume_path: "/stage/v1".into(),
                    capacity_range: CapacityRange::default(),
                },
                &token,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn node_info_names_the_node_and_its_region() {
        let backend = backend();
        let info = backend.node_get_info().await.unwrap();
        assert_eq!(info.node_id, "node-a");
        assert_eq!(info.max_volumes, MAX_VOLUMES_PER_NODE);
        assert_eq!(
            info.accessible_topology.unwrap().region_segment(),
            Some("ewr")
        );
    }

    #[tokio::test]
    async fn capabilities_cover_the_advertised_surface() {
        let backend = backend();
        let caps = backend.node_capabilities().await.unwrap();
        assert_eq!(
            caps,
            vec![
                NodeCapability::StageUnstageVolume,
                NodeCapability::GetVolumeStats,
                NodeCapability::ExpandVolume,
            ]
        );
    }
}
