//! Core data model: volumes, snapshots, capabilities, requests, and topology.
//!
//! These types are shared by the service traits, the transport layer, and the
//! cloud collaborator.  They are all [`Serialize`]/[`Deserialize`] so they can
//! travel the wire as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Maximum number of block volumes that may be attached to one node.
pub const MAX_VOLUMES_PER_NODE: u64 = 11;

/// Directory where the kernel exposes stable device links.
pub const DISK_PATH: &str = "/dev/disk/by-id";

/// Prefix of virtio device links under [`DISK_PATH`].
pub const DISK_PREFIX: &str = "virtio-";

/// Filesystem used for block volumes when the capability names none.
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Filesystem type for virtio-fs shared volumes.
pub const VIRTIOFS_FS_TYPE: &str = "virtiofs";

/// Mode for staging and publish target directories.
pub const MKDIR_MODE: u32 = 0o750;

/// CSI plugin name reported by the Identity service.
pub const PLUGIN_NAME: &str = "block.csi.vultr.com";

/// Topology segment key carrying the cloud region.
pub const TOPOLOGY_REGION_KEY: &str = "region";

/// Floor for provisioned volume sizes when the request names none.
pub const DEFAULT_MIN_SIZE_GB: u64 = 10;

/// One gibibyte, the unit the cloud inventory sizes volumes in.
pub const GIB: u64 = 1 << 30;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// Whether the identifier is empty (invalid in every request).
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
// Storage class
// ---------------------------------------------------------------------------

/// The two storage classes the plugin serves.
///
/// A `Block` volume is a raw virtio disk: single-writer, formatted and
/// mounted by the Node plane.  A `Vfs` volume is a virtio-fs share: mounted
/// by name, writable from many nodes at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeClass {
    Block,
    Vfs,
}

impl VolumeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Vfs => "vfs",
        }
    }

    /// Parse the wire spelling used in parameters and publish contexts.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "block" => Some(Self::Block),
            "vfs" => Some(Self::Vfs),
            _ => None,
        }
    }

    /// Filesystem used when neither the volume nor the capability names one.
    pub fn default_fs_type(&self) -> &'static str {
        match self {
            Self::Block => DEFAULT_FS_TYPE,
            Self::Vfs => VIRTIOFS_FS_TYPE,
        }
    }

    /// Access modes the class can honor.
    pub fn supported_access_modes(&self) -> &'static [AccessMode] {
        match self {
            Self::Block => &[AccessMode::SingleNodeWriter],
            Self::Vfs => &[AccessMode::MultiNodeMultiWriter],
        }
    }
}

impl fmt::Display for VolumeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    SingleNodeWriter,
    /// Multi-node read-only.
    MultiNodeReaderOnly,
    /// Multi-node read-write.
    MultiNodeMultiWriter,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type; the class default applies when absent.
    #[serde(default)]
    pub fs_type: Option<String>,
}

impl VolumeCapability {
    /// The filesystem to use for this capability against the given class.
    pub fn fs_type_or_default(&self, class: VolumeClass) -> &str {
        self.fs_type.as_deref().unwrap_or(class.default_fs_type())
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::SingleNodeWriter,
            mount_flags: Vec::new(),
            fs_type: None,
        }
    }
}

/// Requested capacity bounds in bytes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CapacityRange {
    #[serde(default)]
    pub required_bytes: Option<u64>,
    #[serde(default)]
    pub limit_bytes: Option<u64>,
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    /// Topology segments, e.g. `{"region": "ewr"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

impl Topology {
    /// Build a single-segment topology naming a region.
    pub fn region(region: impl Into<String>) -> Self {
        Self {
            segments: HashMap::from([(TOPOLOGY_REGION_KEY.to_owned(), region.into())]),
        }
    }

    /// The region segment, if present.
    pub fn region_segment(&self) -> Option<&str> {
        self.segments.get(TOPOLOGY_REGION_KEY).map(String::as_str)
    }
}

/// Where a volume must (requisite) or should (preferred) be provisioned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyRequirement {
    #[serde(default)]
    pub requisite: Vec<Topology>,
    #[serde(default)]
    pub preferred: Vec<Topology>,
}

// ---------------------------------------------------------------------------
// Volume & snapshot inventory records
// ---------------------------------------------------------------------------

/// Lifecycle state of a volume in the cloud inventory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    Pending,
    Available,
    Attaching,
    Attached,
    Detaching,
    Resizing,
    Deleting,
}

/// A volume as the cloud inventory sees it.
///
/// `attachments` holds the instance ids the volume is attached to.  A block
/// volume carries at most one entry; a vfs share may carry many.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    /// Human-chosen label; provisioning idempotency is keyed on it.
    pub label: String,
    pub class: VolumeClass,
    pub region: String,
    pub capacity_bytes: u64,
    /// Filesystem baked into the volume, when the cloud records one.
    #[serde(default)]
    pub filesystem_type: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Stable label that surfaces on the node: a device serial for block
    /// volumes, the share name for vfs.
    pub mount_label: String,
    pub state: VolumeState,
}

impl Volume {
    /// The single attachment of a block volume, or the first of a vfs share.
    pub fn attached_node_id(&self) -> Option<&str> {
        self.attachments.first().map(String::as_str)
    }

    pub fn is_attached_to(&self, node_id: &str) -> bool {
        self.attachments.iter().any(|n| n == node_id)
    }

    pub fn filesystem(&self) -> &str {
        self.filesystem_type
            .as_deref()
            .unwrap_or(self.class.default_fs_type())
    }
}

/// A point-in-time copy of a block volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    /// Human-chosen name; snapshot idempotency is keyed on it.
    pub label: String,
    pub source_volume_id: VolumeId,
    pub size_bytes: u64,
    /// RFC 3339 creation timestamp.
    pub creation_time: String,
    pub ready: bool,
}

/// Source a new volume is populated from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeContentSource {
    Snapshot { snapshot_id: String },
    Volume { volume_id: VolumeId },
}

// ---------------------------------------------------------------------------
// Controller requests & responses
// ---------------------------------------------------------------------------

/// Request to provision a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    #[serde(default)]
    pub capabilities: Vec<VolumeCapability>,
    /// Storage-class parameters (`storage_type`, `min_size_gb`, ...).
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub topology: Option<TopologyRequirement>,
    #[serde(default)]
    pub content_source: Option<VolumeContentSource>,
}

/// Request to attach a volume to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerPublishVolumeRequest {
    pub volume_id: VolumeId,
    pub node_id: String,
    pub capability: VolumeCapability,
    #[serde(default)]
    pub readonly: bool,
}

/// Publish context handed to the Node plane verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerPublishVolumeResponse {
    pub publish_context: HashMap<String, String>,
}

/// Request to snapshot a block volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSnapshotRequest {
    pub name: String,
    pub source_volume_id: VolumeId,
}

/// Snapshot listing filters; both default to "no filter".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSnapshotsRequest {
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub source_volume_id: Option<VolumeId>,
}

/// Request to grow a volume in the cloud inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerExpandVolumeRequest {
    pub volume_id: VolumeId,
    pub capacity_range: CapacityRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerExpandVolumeResponse {
    pub capacity_bytes: u64,
    /// Always true here: the filesystem grow happens on the node.
    pub node_expansion_required: bool,
}

// ---------------------------------------------------------------------------
// Node requests & responses
// ---------------------------------------------------------------------------

/// Request to stage (globally mount) a volume on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    pub volume_id: VolumeId,
    /// Node-scoped mount point, e.g.
    /// `/var/lib/kubelet/plugins/.../globalmount`.
    pub staging_target_path: String,
    pub capability: VolumeCapability,
    /// Opaque context carried from the Controller's attach step.
    #[serde(default)]
    pub publish_context: HashMap<String, String>,
}

/// Request to publish (bind-mount) a staged volume into a pod path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    pub volume_id: VolumeId,
    pub staging_target_path: String,
    pub target_path: String,
    pub capability: VolumeCapability,
    #[serde(default)]
    pub readonly: bool,
}

/// One axis of filesystem usage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub available: u64,
    pub total: u64,
    pub used: u64,
}

/// `statfs` snapshot of a mounted volume path.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VolumeStats {
    pub bytes: Usage,
    pub inodes: Usage,
}

/// Request to grow the filesystem behind a mounted path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExpandVolumeRequest {
    pub volume_id: VolumeId,
    pub volume_path: String,
    pub capacity_range: CapacityRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExpandVolumeResponse {
    pub capacity_bytes: u64,
}

// ---------------------------------------------------------------------------
// Plugin, node & capability descriptors
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin as a whole.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// Controller-plane RPCs this plugin implements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ExpandVolume,
    CreateDeleteSnapshot,
    ListSnapshots,
    CloneVolume,
}

/// Node-plane RPCs this plugin implements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
    GetVolumeStats,
    ExpandVolume,
}

/// Information about the node on which the Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub max_volumes: u64,
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}
