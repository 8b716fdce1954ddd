//! QUIC server that dispatches incoming requests to a [`RequestHandler`].

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use quinn::crypto::rustls::QuicServerConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use super::MAX_MESSAGE_SIZE;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

/// Maps one decoded request to one response.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Display + Send;
    type Response: Serialize + Send;

    async fn handle(&self, request: Self::Request) -> Self::Response;

    /// Response sent back when the request body could not be decoded.
    fn malformed(&self, reason: String) -> Self::Response;
}

pub struct QuicServer<H> {
    endpoint: quinn::Endpoint,
    handler: Arc<H>,
}

impl<H: RequestHandler> QuicServer<H> {
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<H>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections until the endpoint is closed.
    ///
    /// Every connection and every bi-stream within it runs on its own task.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    async fn handle_connection(conn: quinn::Connection, handler: Arc<H>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_))
                | Err(quinn::ConnectionError::LocallyClosed) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, handler.as_ref()).await {
                    error!(error = %e, "stream handler error");
                }
            });
        }
    }

    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &H,
    ) -> Result<(), CsiError> {
        let buf = recv
            .read_to_end(MAX_MESSAGE_SIZE)
            .await
            .map_err(CsiError::transport)?;

        let response = match serde_json::from_slice::<H::Request>(&buf) {
            Ok(request) => {
                debug!(%request, "request received");
                handler.handle(request).await
            }
            Err(e) => {
                warn!(error = %e, "malformed request");
                handler.malformed(format!("malformed request: {e}"))
            }
        };

        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;
        Ok(())
    }

    /// The underlying endpoint, for the bound address or shutdown.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

/// Routes [`CsiMessage`] requests to a node plugin implementation.
pub struct CsiDispatcher<T> {
    plugin: Arc<T>,
}

impl<T> CsiDispatcher<T> {
    pub fn new(plugin: Arc<T>) -> Self {
        Self { plugin }
    }
}

fn reply<V>(result: Result<V, CsiError>, wrap: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
    match result {
        Ok(value) => wrap(value),
        Err(e) => CsiMessage::Error(e),
    }
}

#[async_trait]
impl<T> RequestHandler for CsiDispatcher<T>
where
    T: CsiIdentity + CsiNode + 'static,
{
    type Request = CsiMessage;
    type Response = CsiMessage;

    async fn handle(&self, request: CsiMessage) -> CsiMessage {
        let plugin = self.plugin.as_ref();
        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => reply(plugin.probe().await, CsiMessage::ProbeResult),
            CsiMessage::GetPluginInfo => {
                reply(plugin.get_plugin_info().await, CsiMessage::PluginInfoResponse)
            }
            CsiMessage::GetPluginCapabilities => reply(
                plugin.get_plugin_capabilities().await,
                CsiMessage::PluginCapabilitiesResponse,
            ),

            // --- Node -------------------------------------------------------
            CsiMessage::StageVolume(req) => {
                reply(plugin.stage_volume(req).await, |()| CsiMessage::Ok)
            }
            CsiMessage::UnstageVolume {
                volume_id,
                staging_target_path,
            } => reply(
                plugin
                    .unstage_volume(&volume_id, &staging_target_path)
                    .await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::PublishVolume(req) => {
                reply(plugin.publish_volume(req).await, |()| CsiMessage::Ok)
            }
            CsiMessage::UnpublishVolume {
                volume_id,
                target_path,
            } => reply(
                plugin.unpublish_volume(&volume_id, &target_path).await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::GetVolumeStats {
                volume_id,
                volume_path,
            } => reply(
                plugin.get_volume_stats(&volume_id, &volume_path).await,
                CsiMessage::VolumeStatsResponse,
            ),
            CsiMessage::GetNodeCapabilities => reply(
                plugin.get_capabilities().await,
                CsiMessage::NodeCapabilitiesResponse,
            ),
            CsiMessage::GetNodeInfo => reply(plugin.get_info().await, CsiMessage::NodeInfoResponse),

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    fn malformed(&self, reason: String) -> CsiMessage {
        CsiMessage::Error(CsiError::TransportError(reason))
    }
}
