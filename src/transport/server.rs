//! Socket server that dispatches incoming CSI requests to the service
//! traits.

use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{decode, encode, read_frame, write_frame};
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

/// Accepts connections on a Unix socket and dispatches [`CsiMessage`]
/// requests to a combined [`CsiIdentity`] + [`CsiController`] + [`CsiNode`]
/// handler.
pub struct CsiServer<T> {
    listener: UnixListener,
    handler: Arc<T>,
    shutdown: CancellationToken,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Bind the socket, replacing a stale socket file from a previous run.
    pub fn bind(path: &Path, handler: Arc<T>) -> Result<Self, CsiError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CsiError::Transport(format!("create {}: {e}", parent.display())))?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CsiError::Transport(format!(
                    "remove stale socket {}: {e}",
                    path.display()
                )));
            }
        }
        let listener = UnixListener::bind(path).map_err(CsiError::transport)?;
        info!(socket = %path.display(), "CSI server listening");
        Ok(Self {
            listener,
            handler,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops [`CsiServer::serve`] when cancelled.  Cancellation
    /// also propagates into every in-flight RPC.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until the shutdown token fires.  Each connection
    /// runs on its own task.
    pub async fn serve(&self) -> Result<(), CsiError> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("CSI server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let handler = Arc::clone(&self.handler);
                            let token = self.shutdown.child_token();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler, token).await {
                                    warn!(error = %e, "CSI connection error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "CSI accept failed"),
                    }
                }
            }
        }
    }

    /// Serve one connection: read request -> dispatch -> write response,
    /// until the peer hangs up.
    async fn handle_connection(
        stream: UnixStream,
        handler: Arc<T>,
        token: CancellationToken,
    ) -> Result<(), CsiError> {
        let (mut reader, mut writer) = stream.into_split();
        while let Some(payload) = read_frame(&mut reader).await? {
            let request = match decode(&payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "malformed CSI request");
                    let response = encode(&CsiMessage::Error(e))?;
                    write_frame(&mut writer, &response).await?;
                    continue;
                }
            };
            debug!(%request, "CSI request received");
            let response = Self::dispatch(&handler, request, &token).await;
            debug!(%response, "CSI response sent");
            write_frame(&mut writer, &encode(&response)?).await?;
        }
        Ok(())
    }

    /// Map a request variant to the matching trait call and wrap the result
    /// back into a response variant.
    async fn dispatch(handler: &T, request: CsiMessage, token: &CancellationToken) -> CsiMessage {
        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => match handler.probe().await {
                Ok(ok) => CsiMessage::ProbeResult(ok),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginInfo => match handler.get_plugin_info().await {
                Ok(info) => CsiMessage::PluginInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginCapabilities => match handler.get_plugin_capabilities().await {
                Ok(caps) => CsiMessage::PluginCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => match handler.create_volume(req, token).await {
                Ok(volume) => CsiMessage::VolumeCreated(volume),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::DeleteVolume(id) => match handler.delete_volume(&id, token).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::ControllerPublishVolume(req) => {
                match handler.controller_publish_volume(req, token).await {
                    Ok(response) => CsiMessage::PublishContextResponse(response),
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::ControllerUnpublishVolume { volume_id, node_id } => {
                match handler
                    .controller_unpublish_volume(&volume_id, &node_id, token)
                    .await
                {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::CreateSnapshot(req) => match handler.create_snapshot(req, token).await {
                Ok(snapshot) => CsiMessage::SnapshotCreated(snapshot),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::DeleteSnapshot { snapshot_id } => {
                match handler.delete_snapshot(&snapshot_id, token).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::ListSnapshots(req) => match handler.list_snapshots(req, token).await {
                Ok(list) => CsiMessage::SnapshotList(list),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::ControllerExpandVolume(req) => {
                match handler.controller_expand_volume(req, token).await {
                    Ok(response) => CsiMessage::VolumeExpanded(response),
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::GetControllerCapabilities => {
                match handler.controller_capabilities().await {
                    Ok(caps) => CsiMessage::ControllerCapabilities(caps),
                    Err(e) => CsiMessage::Error(e),
                }
            }

            // --- Node -------------------------------------------------------
            CsiMessage::StageVolume(req) => match handler.node_stage_volume(req, token).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::UnstageVolume {
                volume_id,
                staging_target_path,
            } => {
                match handler
                    .node_unstage_volume(&volume_id, &staging_target_path, token)
                    .await
                {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::PublishVolume(req) => {
                match handler.node_publish_volume(req, token).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::UnpublishVolume {
                volume_id,
                target_path,
            } => {
                match handler
                    .node_unpublish_volume(&volume_id, &target_path, token)
                    .await
                {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::GetVolumeStats {
                volume_id,
                volume_path,
            } => {
                match handler
                    .node_get_volume_stats(&volume_id, &volume_path, token)
                    .await
                {
                    Ok(stats) => CsiMessage::VolumeStatsResponse(stats),
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::NodeExpandVolume(req) => {
                match handler.node_expand_volume(req, token).await {
                    Ok(response) => CsiMessage::NodeVolumeExpanded(response),
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::GetNodeCapabilities => match handler.node_capabilities().await {
                Ok(caps) => CsiMessage::NodeCapabilities(caps),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetNodeInfo => match handler.node_get_info().await {
                Ok(info) => CsiMessage::NodeInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }
}
