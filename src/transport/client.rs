//! Socket client used by tooling and tests to issue CSI requests.

use std::path::Path;

use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::debug;

use super::{decode, encode, read_frame, write_frame};
use crate::error::CsiError;
use crate::message::CsiMessage;

/// A lightweight CSI client over the plugin's Unix socket.
///
/// Requests on one client are serialized; open several clients for
/// concurrent calls.
pub struct CsiClient {
    stream: Mutex<UnixStream>,
}

impl CsiClient {
    /// Connect to the plugin socket at `path`.
    pub async fn connect(path: &Path) -> Result<Self, CsiError> {
        let stream = UnixStream::connect(path).await.map_err(CsiError::transport)?;
        debug!(socket = %path.display(), "CSI connection established");
        Ok(Self {
            stream: Mutex::new(stream),
        })
    }

    /// Send a request and wait for the corresponding response.
    pub async fn request(&self, message: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &encode(message)?).await?;
        let payload = read_frame(&mut *stream)
            .await?
            .ok_or_else(|| CsiError::Transport("connection closed by server".into()))?;
        let response = decode(&payload)?;
        debug!(%response, "CSI response received");
        Ok(response)
    }
}
