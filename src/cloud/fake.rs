//! In-memory cloud inventory used by the test suites.
//!
//! Behaves like the real inventory observed through [`CloudApi`]: volumes
//! and snapshots are keyed records, attach/detach mutate attachment lists,
//! and a handful of knobs let tests inject transport failures or freeze
//! state transitions to exercise polling ceilings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{CloudApi, CloudError, Instance, Region, VolumeCreate};
use crate::types::{Snapshot, Volume, VolumeClass, VolumeContentSource, VolumeId, VolumeState};

#[derive(Default)]
struct State {
    volumes: HashMap<VolumeId, Volume>,
    snapshots: HashMap<String, Snapshot>,
    instances: HashMap<String, Instance>,
    regions: Vec<Region>,
}

pub(crate) struct FakeCloud {
    state: Mutex<State>,
    transport_failures: AtomicU32,
    /// When set, created volumes stay `Pending` forever.
    stall_create: AtomicBool,
    /// When set, attach requests never reach `Attached`.
    stall_attach: AtomicBool,
    /// When set, created snapshots stay not-ready.
    stall_snapshot: AtomicBool,
}

impl FakeCloud {
    pub fn new() -> Self {
        let fake = Self {
            state: Mutex::new(State::default()),
            transport_failures: AtomicU32::new(0),
            stall_create: AtomicBool::new(false),
            stall_attach: AtomicBool::new(false),
            stall_snapshot: AtomicBool::new(false),
        };
        {
            let mut state = fake.state.lock().unwrap();
            state.regions = vec![Region { id: "ewr".into() }, Region { id: "ams".into() }];
        }
        fake
    }

    /// Fail the next `n` API calls with a retryable transport error.
    pub fn inject_transport_failures(&self, n: u32) {
        self.transport_failures.store(n, Ordering::SeqCst);
    }

    pub fn stall_creation(&self) {
        self.stall_create.store(true, Ordering::SeqCst);
    }

    pub fn stall_attachments(&self) {
        self.stall_attach.store(true, Ordering::SeqCst);
    }

    pub fn stall_snapshots(&self) {
        self.stall_snapshot.store(true, Ordering::SeqCst);
    }

    pub fn add_instance(&self, id: &str, region: &str) {
        let mut state = self.state.lock().unwrap();
        state.instances.insert(
            id.to_owned(),
            Instance {
                id: id.to_owned(),
                region: region.to_owned(),
            },
        );
    }

    pub fn seed_volume(&self, volume: Volume) {
        let mut state = self.state.lock().unwrap();
        state.volumes.insert(volume.id.clone(), volume);
    }

    pub fn volume(&self, id: &VolumeId) -> Option<Volume> {
        self.state.lock().unwrap().volumes.get(id).cloned()
    }

    fn maybe_fail(&self) -> Result<(), CloudError> {
        let remaining = self.transport_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transport_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CloudError::Transport {
                message: "connection reset by peer".into(),
                retryable: true,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn list_volumes(
        &self,
        label: Option<&str>,
        _token: &CancellationToken,
    ) -> Result<Vec<Volume>, CloudError> {
        self.maybe_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .volumes
            .values()
            .filter(|v| label.is_none_or(|l| v.label == l))
            .cloned()
            .collect())
    }

    async fn get_volume(
        &self,
        id: &VolumeId,
        _token: &CancellationToken,
    ) -> Result<Volume, CloudError> {
        self.maybe_fail()?;
        let state = self.state.lock().unwrap();
        state
            .volumes
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("volume {id}")))
    }

    async fn create_volume(
        &self,
        spec: VolumeCreate,
        _token: &CancellationToken,
    ) -> Result<Volume, CloudError> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        match &spec.source {
            Some(VolumeContentSource::Snapshot { snapshot_id }) => {
                if !state.snapshots.contains_key(snapshot_id) {
                    return Err(CloudError::NotFound(format!("snapshot {snapshot_id}")));
                }
            }
            Some(VolumeContentSource::Volume { volume_id }) => {
                if !state.volumes.contains_key(volume_id) {
                    return Err(CloudError::NotFound(format!("volume {volume_id}")));
                }
            }
            None => {}
        }
        let short = Uuid::new_v4().simple().to_string();
        let volume = Volume {
            id: VolumeId(format!("vol-{short}")),
            label: spec.label,
            class: spec.class,
            region: spec.region.clone(),
            capacity_bytes: spec.capacity_bytes,
            filesystem_type: None,
            attachments: Vec::new(),
            mount_label: format!("{}-{}", spec.region, &short[..8]),
            state: if self.stall_create.load(Ordering::SeqCst) {
                VolumeState::Pending
            } else {
                VolumeState::Available
            },
        };
        state.volumes.insert(volume.id.clone(), volume.clone());
        Ok(volume)
    }

    async fn delete_volume(
        &self,
        id: &VolumeId,
        _token: &CancellationToken,
    ) -> Result<(), CloudError> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        state
            .volumes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("volume {id}")))
    }

    async fn attach_volume(
        &self,
        id: &VolumeId,
        instance_id: &str,
        _token: &CancellationToken,
    ) -> Result<(), CloudError> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        if !state.instances.contains_key(instance_id) {
            return Err(CloudError::NotFound(format!("instance {instance_id}")));
        }
        let volume = state
            .volumes
            .get_mut(id)
            .ok_or_else(|| CloudError::NotFound(format!("volume {id}")))?;
        if volume.is_attached_to(instance_id) {
            return Ok(());
        }
        if volume.class == VolumeClass::Block && !volume.attachments.is_empty() {
            return Err(CloudError::Api(format!(
                "volume {id} is already attached to another instance"
            )));
        }
        if self.stall_attach.load(Ordering::SeqCst) {
            volume.state = VolumeState::Attaching;
            return Ok(());
        }
        volume.attachments.push(instance_id.to_owned());
        volume.state = VolumeState::Attached;
        Ok(())
    }

    async fn detach_volume(
        &self,
        id: &VolumeId,
        instance_id: &str,
        _token: &CancellationToken,
    ) -> Result<(), CloudError> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        let volume = state
            .volumes
            .get_mut(id)
            .ok_or_else(|| CloudError::NotFound(format!("volume {id}")))?;
        volume.attachments.retain(|n| n != instance_id);
        if volume.attachments.is_empty() {
            volume.state = VolumeState::Available;
        }
        Ok(())
    }

    async fn resize_volume(
        &self,
        id: &VolumeId,
        capacity_bytes: u64,
        _token: &CancellationToken,
    ) -> Result<Volume, CloudError> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        let volume = state
            .volumes
            .get_mut(id)
            .ok_or_else(|| CloudError::NotFound(format!("volume {id}")))?;
        if capacity_bytes < volume.capacity_bytes {
            return Err(CloudError::Api("volumes cannot shrink".into()));
        }
        volume.capacity_bytes = capacity_bytes;
        Ok(volume.clone())
    }

    async fn list_snapshots(
        &self,
        label: Option<&str>,
        source_volume_id: Option<&VolumeId>,
        _token: &CancellationToken,
    ) -> Result<Vec<Snapshot>, CloudError> {
        self.maybe_fail()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .values()
            .filter(|s| label.is_none_or(|l| s.label == l))
            .filter(|s| source_volume_id.is_none_or(|v| &s.source_volume_id == v))
            .cloned()
            .collect())
    }

    async fn get_snapshot(
        &self,
        id: &str,
        _token: &CancellationToken,
    ) -> Result<Snapshot, CloudError> {
        self.maybe_fail()?;
        let state = self.state.lock().unwrap();
        state
            .snapshots
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("snapshot {id}")))
    }

    async fn create_snapshot(
        &self,
        label: &str,
        source_volume_id: &VolumeId,
        _token: &CancellationToken,
    ) -> Result<Snapshot, CloudError> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        let source = state
            .volumes
            .get(source_volume_id)
            .ok_or_else(|| CloudError::NotFound(format!("volume {source_volume_id}")))?;
        let snapshot = Snapshot {
            id: format!("snap-{}", Uuid::new_v4().simple()),
            label: label.to_owned(),
            source_volume_id: source_volume_id.clone(),
            size_bytes: source.capacity_bytes,
            creation_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ready: !self.stall_snapshot.load(Ordering::SeqCst),
        };
        state.snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn delete_snapshot(&self, id: &str, _token: &CancellationToken) -> Result<(), CloudError> {
        self.maybe_fail()?;
        let mut state = self.state.lock().unwrap();
        state
            .snapshots
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("snapshot {id}")))
    }

    async fn get_instance(
        &self,
        id: &str,
        _token: &CancellationToken,
    ) -> Result<Instance, CloudError> {
        self.maybe_fail()?;
        let state = self.state.lock().unwrap();
        state
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("instance {id}")))
    }

    async fn list_regions(&self, _token: &CancellationToken) -> Result<Vec<Region>, CloudError> {
        self.maybe_fail()?;
        Ok(self.state.lock().unwrap().regions.clone())
    }
}
