//! CSI protocol messages carried by the socket transport.
//!
//! [`CsiMessage`] is the envelope for every request and response variant
//! exchanged between the orchestrator-facing client and the plugin server.
//! Each wire exchange carries exactly one request followed by one response
//! (or [`CsiMessage::Error`]).

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Controller requests ---------------------------------------------
    /// Provision a volume.
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume.
    DeleteVolume(VolumeId),
    /// Attach a volume to a node.
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    /// Detach a volume from a node.
    ControllerUnpublishVolume {
        volume_id: VolumeId,
        node_id: String,
    },
    /// Snapshot a volume.
    CreateSnapshot(CreateSnapshotRequest),
    /// Delete a snapshot.
    DeleteSnapshot { snapshot_id: String },
    /// List snapshots.
    ListSnapshots(ListSnapshotsRequest),
    /// Grow a volume in the inventory.
    ControllerExpandVolume(ControllerExpandVolumeRequest),
    /// Query controller capabilities.
    GetControllerCapabilities,

    // ----- Node requests ---------------------------------------------------
    /// Stage a volume at the node-scoped path.
    StageVolume(NodeStageVolumeRequest),
    /// Unstage a previously staged volume.
    UnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    /// Bind-mount a staged volume into a pod path.
    PublishVolume(NodePublishVolumeRequest),
    /// Remove the bind mount again.
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Query usage of a mounted path.
    GetVolumeStats {
        volume_id: VolumeId,
        volume_path: String,
    },
    /// Grow the filesystem behind a mounted path.
    NodeExpandVolume(NodeExpandVolumeRequest),
    /// Query node capabilities.
    GetNodeCapabilities,
    /// Query node identity and topology.
    GetNodeInfo,

    // ----- Identity requests -----------------------------------------------
    /// Health probe.
    Probe,
    /// Query plugin info.
    GetPluginInfo,
    /// Query plugin capabilities.
    GetPluginCapabilities,

    // ----- Responses -------------------------------------------------------
    /// A volume was provisioned (or adopted).
    VolumeCreated(Volume),
    /// Publish context from a successful attach.
    PublishContextResponse(ControllerPublishVolumeResponse),
    /// A snapshot record.
    SnapshotCreated(Snapshot),
    /// A list of snapshots.
    SnapshotList(Vec<Snapshot>),
    /// Inventory-side expansion result.
    VolumeExpanded(ControllerExpandVolumeResponse),
    /// Controller capability set.
    ControllerCapabilities(Vec<ControllerCapability>),
    /// Usage of a mounted path.
    VolumeStatsResponse(VolumeStats),
    /// Node-side expansion result.
    NodeVolumeExpanded(NodeExpandVolumeResponse),
    /// Node capability set.
    NodeCapabilities(Vec<NodeCapability>),
    /// Node identity and topology.
    NodeInfoResponse(NodeInfo),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capability set.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Probe result.
    ProbeResult(bool),
    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(CsiError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({id})"),
            Self::ControllerPublishVolume(req) => {
                write!(f, "ControllerPublishVolume({} -> {})", req.volume_id, req.node_id)
            }
            Self::ControllerUnpublishVolume { volume_id, node_id } => {
                write!(f, "ControllerUnpublishVolume({volume_id} -x- {node_id})")
            }
            Self::CreateSnapshot(req) => write!(f, "CreateSnapshot(name={})", req.name),
            Self::DeleteSnapshot { snapshot_id } => write!(f, "DeleteSnapshot({snapshot_id})"),
            Self::ListSnapshots(_) => f.write_str("ListSnapshots"),
            Self::ControllerExpandVolume(req) => {
                write!(f, "ControllerExpandVolume({})", req.volume_id)
            }
            Self::GetControllerCapabilities => f.write_str("GetControllerCapabilities"),
            Self::StageVolume(req) => write!(f, "StageVolume({})", req.volume_id),
            Self::UnstageVolume { volume_id, .. } => write!(f, "UnstageVolume({volume_id})"),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume { volume_id, .. } => {
                write!(f, "UnpublishVolume({volume_id})")
            }
            Self::GetVolumeStats { volume_id, .. } => write!(f, "GetVolumeStats({volume_id})"),
            Self::NodeExpandVolume(req) => write!(f, "NodeExpandVolume({})", req.volume_id),
            Self::GetNodeCapabilities => f.write_str("GetNodeCapabilities"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.id),
            Self::PublishContextResponse(_) => f.write_str("PublishContextResponse"),
            Self::SnapshotCreated(s) => write!(f, "SnapshotCreated({})", s.id),
            Self::SnapshotList(list) => write!(f, "SnapshotList(count={})", list.len()),
            Self::VolumeExpanded(r) => {
                write!(f, "VolumeExpanded(bytes={})", r.capacity_bytes)
            }
            Self::ControllerCapabilities(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::VolumeStatsResponse(stats) => {
                write!(f, "VolumeStats(total={})", stats.bytes.total)
            }
            Self::NodeVolumeExpanded(r) => {
                write!(f, "NodeVolumeExpanded(bytes={})", r.capacity_bytes)
            }
            Self::NodeCapabilities(caps) => write!(f, "NodeCapabilities(count={})", caps.len()),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serde_round_trip() {
        let msg = CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "d1".into(),
            ..Default::default()
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::CreateVolume(req) if req.name == "d1"));
    }

    #[test]
    fn error_message_round_trip() {
        let msg = CsiMessage::Error(CsiError::VolumeNotFound("vol-1".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::VolumeNotFound(_))));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(CsiMessage::Probe.to_string(), "Probe");
        assert_eq!(
            CsiMessage::DeleteVolume(VolumeId("vol-9".into())).to_string(),
            "DeleteVolume(vol-9)"
        );
    }
}
