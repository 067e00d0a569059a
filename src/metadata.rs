//! The node identity collaborator.
//!
//! On startup the Node role learns which cloud instance it runs on and in
//! which region from the instance metadata endpoint; those become the CSI
//! node id and the region topology segment.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::CsiError;

const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/v1.json";

/// Instance identity as the Node plane consumes it.
#[async_trait]
pub trait NodeMetadata: Send + Sync {
    /// Cloud instance identifier of this node.
    async fn instance_id(&self) -> Result<String, CsiError>;

    /// Region this node runs in.
    async fn region(&self) -> Result<String, CsiError>;
}

#[derive(Debug, Clone, Deserialize)]
struct MetadataDocument {
    #[serde(rename = "instance-v2-id", alias = "instanceid")]
    instance_id: String,
    region: MetadataRegion,
}

#[derive(Debug, Clone, Deserialize)]
struct MetadataRegion {
    #[serde(rename = "regioncode")]
    region_code: String,
}

/// [`NodeMetadata`] over the HTTP metadata endpoint.
///
/// The document is immutable for the lifetime of the instance, so it is
/// fetched once and cached.
pub struct MetadataClient {
    http: reqwest::Client,
    url: String,
    document: OnceCell<MetadataDocument>,
}

impl MetadataClient {
    pub fn new() -> Self {
        Self::with_url(DEFAULT_METADATA_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            document: OnceCell::new(),
        }
    }

    async fn document(&self) -> Result<&MetadataDocument, CsiError> {
        self.document
            .get_or_try_init(|| async {
                let response = self
                    .http
                    .get(&self.url)
                    .send()
                    .await
                    .map_err(|e| CsiError::Internal(format!("metadata endpoint: {e}")))?
                    .error_for_status()
                    .map_err(|e| CsiError::Internal(format!("metadata endpoint: {e}")))?;
                response
                    .json::<MetadataDocument>()
                    .await
                    .map_err(|e| CsiError::Internal(format!("metadata document: {e}")))
            })
            .await
    }
}

impl Default for MetadataClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeMetadata for MetadataClient {
    async fn instance_id(&self) -> Result<String, CsiError> {
        Ok(self.document().await?.instance_id.clone())
    }

    async fn region(&self) -> Result<String, CsiError> {
        Ok(self.document().await?.region.region_code.clone())
    }
}
