//! The cloud inventory collaborator.
//!
//! [`CloudApi`] is the typed interface the Controller plane consumes.  The
//! concrete REST binding lives in [`rest`]; [`retry::Retrying`] wraps any
//! implementation with the rate limit and retry ceiling the inventory API
//! demands.  Every method accepts a cancellation token and either succeeds,
//! returns a structured not-found, or returns a transport error carrying a
//! retry hint.

pub mod rest;
pub mod retry;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::CsiError;
use crate::types::{Snapshot, Volume, VolumeClass, VolumeContentSource, VolumeId};

/// Errors surfaced by the cloud collaborator.
#[derive(Debug, Error, Clone)]
pub enum CloudError {
    /// The entity does not exist in the inventory.
    #[error("{0} not found")]
    NotFound(String),

    /// The request did not complete; `retryable` hints whether a retry can
    /// converge (timeouts, connection resets, throttling).
    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },

    /// The API rejected the request.
    #[error("cloud API rejected request: {0}")]
    Api(String),

    /// The caller's cancellation token was observed.
    #[error("cloud call canceled")]
    Canceled,
}

impl CloudError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<CloudError> for CsiError {
    fn from(e: CloudError) -> Self {
        match e {
            CloudError::NotFound(what) => CsiError::NotFound(what),
            CloudError::Canceled => CsiError::Canceled("cloud call".into()),
            other => CsiError::Cloud(other.to_string()),
        }
    }
}

/// Parameters for a new inventory volume.
#[derive(Debug, Clone)]
pub struct VolumeCreate {
    pub label: String,
    pub region: String,
    pub class: VolumeClass,
    pub capacity_bytes: u64,
    pub source: Option<VolumeContentSource>,
}

/// A compute instance as the inventory sees it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Instance {
    pub id: String,
    pub region: String,
}

/// A region offered by the cloud.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Region {
    pub id: String,
}

/// Typed client for the cloud inventory API.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// List volumes, optionally filtered by label.
    async fn list_volumes(
        &self,
        label: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<Volume>, CloudError>;

    async fn get_volume(
        &self,
        id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<Volume, CloudError>;

    async fn create_volume(
        &self,
        spec: VolumeCreate,
        token: &CancellationToken,
    ) -> Result<Volume, CloudError>;

    async fn delete_volume(
        &self,
        id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<(), CloudError>;

    async fn attach_volume(
        &self,
        id: &VolumeId,
        instance_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CloudError>;

    async fn detach_volume(
        &self,
        id: &VolumeId,
        instance_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CloudError>;

    async fn resize_volume(
        &self,
        id: &VolumeId,
        capacity_bytes: u64,
        token: &CancellationToken,
    ) -> Result<Volume, CloudError>;

    /// List snapshots, optionally filtered by label and/or source volume.
    async fn list_snapshots(
        &self,
        label: Option<&str>,
        source_volume_id: Option<&VolumeId>,
        token: &CancellationToken,
    ) -> Result<Vec<Snapshot>, CloudError>;

    async fn get_snapshot(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<Snapshot, CloudError>;

    async fn create_snapshot(
        &self,
        label: &str,
        source_volume_id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<Snapshot, CloudError>;

    async fn delete_snapshot(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<(), CloudError>;

    async fn get_instance(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<Instance, CloudError>;

    async fn list_regions(&self, token: &CancellationToken) -> Result<Vec<Region>, CloudError>;
}
