//! REST binding of [`CloudApi`] against the cloud inventory's v2 endpoints.
//!
//! The binding is deliberately thin: DTOs mirror the wire payloads (sizes in
//! whole gigabytes for volumes), and every status code folds into the
//! structured [`CloudError`] classification the retry layer keys on.  Wrap a
//! [`RestClient`] in [`super::retry::Retrying`] before handing it to the
//! Controller plane.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use super::{CloudApi, CloudError, Instance, Region, VolumeCreate};
use crate::types::{
    Snapshot, Volume, VolumeClass, VolumeContentSource, VolumeId, VolumeState, GIB,
};

const DEFAULT_BASE_URL: &str = "https://api.vultr.com/v2";

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self::with_base_url(api_token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: api_token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
        token: &CancellationToken,
    ) -> Result<reqwest::Response, CloudError> {
        let request = request.bearer_auth(&self.token);
        let response = tokio::select! {
            _ = token.cancelled() => return Err(CloudError::Canceled),
            r = request.send() => r.map_err(|e| CloudError::Transport {
                retryable: e.is_timeout() || e.is_connect(),
                message: e.to_string(),
            })?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => CloudError::NotFound(what.to_owned()),
            StatusCode::TOO_MANY_REQUESTS => CloudError::Transport {
                message: format!("rate limited: {body}"),
                retryable: true,
            },
            s if s.is_server_error() => CloudError::Transport {
                message: format!("{s}: {body}"),
                retryable: true,
            },
            s => CloudError::Api(format!("{s}: {body}")),
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
        token: &CancellationToken,
    ) -> Result<T, CloudError> {
        let response = self.execute(request, what, token).await?;
        response.json().await.map_err(|e| CloudError::Transport {
            message: format!("malformed {what} payload: {e}"),
            retryable: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireVolume {
    id: String,
    label: String,
    region: String,
    size_gb: u64,
    #[serde(rename = "type")]
    class: VolumeClass,
    #[serde(default)]
    filesystem_type: Option<String>,
    #[serde(default)]
    attached_instances: Vec<String>,
    mount_id: String,
    status: VolumeState,
}

impl From<WireVolume> for Volume {
    fn from(w: WireVolume) -> Self {
        Volume {
            id: VolumeId(w.id),
            label: w.label,
            class: w.class,
            region: w.region,
            capacity_bytes: w.size_gb * GIB,
            filesystem_type: w.filesystem_type,
            attachments: w.attached_instances,
            mount_label: w.mount_id,
            state: w.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    id: String,
    label: String,
    volume_id: String,
    size_bytes: u64,
    date_created: String,
    status: String,
}

impl From<WireSnapshot> for Snapshot {
    fn from(w: WireSnapshot) -> Self {
        Snapshot {
            id: w.id,
            label: w.label,
            source_volume_id: VolumeId(w.volume_id),
            size_bytes: w.size_bytes,
            creation_time: w.date_created,
            ready: w.status == "complete",
        }
    }
}

#[derive(Deserialize)]
struct VolumeEnvelope {
    volume: WireVolume,
}

#[derive(Deserialize)]
struct VolumeListEnvelope {
    volumes: Vec<WireVolume>,
}

#[derive(Deserialize)]
struct SnapshotEnvelope {
    snapshot: WireSnapshot,
}

#[derive(Deserialize)]
struct SnapshotListEnvelope {
    snapshots: Vec<WireSnapshot>,
}

#[derive(Deserialize)]
struct InstanceEnvelope {
    instance: Instance,
}

#[derive(Deserialize)]
struct RegionListEnvelope {
    regions: Vec<Region>,
}

#[derive(Serialize)]
struct CreateVolumeBody<'a> {
    label: &'a str,
    region: &'a str,
    size_gb: u64,
    #[serde(rename = "type")]
    class: VolumeClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_snapshot_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_volume_id: Option<&'a str>,
}

#[derive(Serialize)]
struct ResizeBody {
    size_gb: u64,
}

#[derive(Serialize)]
struct AttachBody<'a> {
    instance_id: &'a str,
}

#[derive(Serialize)]
struct CreateSnapshotBody<'a> {
    label: &'a str,
    volume_id: &'a str,
}

#[async_trait]
impl CloudApi for RestClient {
    async fn list_volumes(
        &self,
        label: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<Volume>, CloudError> {
        let mut request = self.http.get(self.url("/volumes"));
        if let Some(label) = label {
            request = request.query(&[("label", label)]);
        }
        let envelope: VolumeListEnvelope = self.fetch(request, "volumes", token).await?;
        Ok(envelope.volumes.into_iter().map(Volume::from).collect())
    }

    async fn get_volume(
        &self,
        id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<Volume, CloudError> {
        let request = self.http.get(self.url(&format!("/volumes/{id}")));
        let envelope: VolumeEnvelope = self
            .fetch(request, &format!("volume {id}"), token)
            .await?;
        Ok(envelope.volume.into())
    }

    async fn create_volume(
        &self,
        spec: VolumeCreate,
        token: &CancellationToken,
    ) -> Result<Volume, CloudError> {
        let (source_snapshot_id, source_volume_id) = match &spec.source {
            Some(VolumeContentSource::Snapshot { snapshot_id }) => {
                (Some(snapshot_id.as_str()), None)
            }
            Some(VolumeContentSource::Volume { volume_id }) => {
                (None, Some(volume_id.0.as_str()))
            }
            None => (None, None),
        };
        let body = CreateVolumeBody {
            label: &spec.label,
            region: &spec.region,
            size_gb: spec.capacity_bytes.div_ceil(GIB),
            class: spec.class,
            source_snapshot_id,
            source_volume_id,
        };
        let request = self.http.post(self.url("/volumes")).json(&body);
        let envelope: VolumeEnvelope = self.fetch(request, "volume", token).await?;
        Ok(envelope.volume.into())
    }

    async fn delete_volume(
        &self,
        id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<(), CloudError> {
        let request = self.http.delete(self.url(&format!("/volumes/{id}")));
        self.execute(request, &format!("volume {id}"), token).await?;
        Ok(())
    }

    async fn attach_volume(
        &self,
        id: &VolumeId,
        instance_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CloudError> {
        let request = self
            .http
            .post(self.url(&format!("/volumes/{id}/attach")))
            .json(&AttachBody { instance_id });
        self.execute(request, &format!("volume {id}"), token).await?;
        Ok(())
    }

    async fn detach_volume(
        &self,
        id: &VolumeId,
        instance_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CloudError> {
        let request = self
            .http
            .post(self.url(&format!("/volumes/{id}/detach")))
            .json(&AttachBody { instance_id });
        self.execute(request, &format!("volume {id}"), token).await?;
        Ok(())
    }

    async fn resize_volume(
        &self,
        id: &VolumeId,
        capacity_bytes: u64,
        token: &CancellationToken,
    ) -> Result<Volume, CloudError> {
        let request = self
            .http
            .patch(self.url(&format!("/volumes/{id}")))
            .json(&ResizeBody {
                size_gb: capacity_bytes.div_ceil(GIB),
            });
        let envelope: VolumeEnvelope = self
            .fetch(request, &format!("volume {id}"), token)
            .await?;
        Ok(envelope.volume.into())
    }

    async fn list_snapshots(
        &self,
        label: Option<&str>,
        source_volume_id: Option<&VolumeId>,
        token: &CancellationToken,
    ) -> Result<Vec<Snapshot>, CloudError> {
        let mut request = self.http.get(self.url("/snapshots"));
        if let Some(label) = label {
            request = request.query(&[("label", label)]);
        }
        if let Some(volume_id) = source_volume_id {
            request = request.query(&[("volume_id", volume_id.0.as_str())]);
        }
        let envelope: SnapshotListEnvelope = self.fetch(request, "snapshots", token).await?;
        Ok(envelope.snapshots.into_iter().map(Snapshot::from).collect())
    }

    async fn get_snapshot(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<Snapshot, CloudError> {
        let request = self.http.get(self.url(&format!("/snapshots/{id}")));
        let envelope: SnapshotEnvelope = self
            .fetch(request, &format!("snapshot {id}"), token)
            .await?;
        Ok(envelope.snapshot.into())
    }

    async fn create_snapshot(
        &self,
        label: &str,
        source_volume_id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<Snapshot, CloudError> {
        let request = self
            .http
            .post(self.url("/snapshots"))
            .json(&CreateSnapshotBody {
                label,
                volume_id: &source_volume_id.0,
            });
        let envelope: SnapshotEnvelope = self.fetch(request, "snapshot", token).await?;
        Ok(envelope.snapshot.into())
    }

    async fn delete_snapshot(&self, id: &str, token: &CancellationToken) -> Result<(), CloudError> {
        let request = self.http.delete(self.url(&format!("/snapshots/{id}")));
        self.execute(request, &format!("snapshot {id}"), token).await?;
        Ok(())
    }

    async fn get_instance(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<Instance, CloudError> {
        let request = self.http.get(self.url(&format!("/instances/{id}")));
        let envelope: InstanceEnvelope = self
            .fetch(request, &format!("instance {id}"), token)
            .await?;
        Ok(envelope.instance)
    }

    async fn list_regions(&self, token: &CancellationToken) -> Result<Vec<Region>, CloudError> {
        let request = self.http.get(self.url("/regions"));
        let envelope: RegionListEnvelope = self.fetch(request, "regions", token).await?;
        Ok(envelope.regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_volume_converts_sizes_and_state() {
        let raw = r#"{
            "id": "vol-1",
            "label": "data",
            "region": "ewr",
            "size_gb": 10,
            "type": "block",
            "attached_instances": ["i-1"],
            "mount_id": "ewr-abcd1234",
            "status": "attached"
        }"#;
        let wire: WireVolume = serde_json::from_str(raw).unwrap();
        let volume: Volume = wire.into();
        assert_eq!(volume.capacity_bytes, 10 * GIB);
        assert_eq!(volume.class, VolumeClass::Block);
        assert_eq!(volume.state, VolumeState::Attached);
        assert_eq!(volume.attached_node_id(), Some("i-1"));
        assert_eq!(volume.mount_label, "ewr-abcd1234");
    }

    #[test]
    fn wire_snapshot_ready_tracks_status() {
        let raw = r#"{
            "id": "snap-1",
            "label": "backup",
            "volume_id": "vol-1",
            "size_bytes": 1024,
            "date_created": "2025-06-01T00:00:00Z",
            "status": "complete"
        }"#;
        let wire: WireSnapshot = serde_json::from_str(raw).unwrap();
        let snapshot: Snapshot = wire.into();
        assert!(snapshot.ready);
        assert_eq!(snapshot.source_volume_id, VolumeId("vol-1".into()));

        let pending = r#"{
            "id": "snap-2",
            "label": "backup",
            "volume_id": "vol-1",
            "size_bytes": 0,
            "date_created": "2025-06-01T00:00:00Z",
            "status": "pending"
        }"#;
        let wire: WireSnapshot = serde_json::from_str(pending).unwrap();
        assert!(!Snapshot::from(wire).ready);
    }

    #[test]
    fn create_body_rounds_capacity_up_to_whole_gb() {
        let body = CreateVolumeBody {
            label: "data",
            region: "ewr",
            size_gb: (10 * GIB + 1).div_ceil(GIB),
            class: VolumeClass::Block,
            source_snapshot_id: None,
            source_volume_id: None,
        };
        assert_eq!(body.size_gb, 11);
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"type\":\"block\""));
        assert!(!json.contains("source_snapshot_id"));
    }
}
