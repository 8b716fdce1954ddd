//! QUIC client for the node RPC and the mount proxy.

use std::fmt::Display;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::MAX_MESSAGE_SIZE;
use crate::error::CsiError;

/// Sends requests over a single QUIC connection.
pub struct QuicClient {
    connection: quinn::Connection,
}

impl QuicClient {
    /// Connect to the server at `addr`.
    ///
    /// `server_name` is the TLS SNI name and must match a SAN in the server's
    /// certificate.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, CsiError> {
        let quic_client_config = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

        let bind: SocketAddr = if addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let mut endpoint = quinn::Endpoint::client(bind).map_err(CsiError::transport)?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(CsiError::transport)?
            .await
            .map_err(CsiError::transport)?;

        debug!(%addr, %server_name, "QUIC connection established");
        Ok(Self { connection })
    }

    /// Send one request and wait for its response on a fresh bi-stream.
    #[instrument(skip_all, fields(msg = %msg))]
    pub async fn request<Req, Resp>(&self, msg: &Req) -> Result<Resp, CsiError>
    where
        Req: Serialize + Display,
        Resp: DeserializeOwned + Display,
    {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(CsiError::transport)?;

        let payload = serde_json::to_vec(msg).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;

        let buf = recv
            .read_to_end(MAX_MESSAGE_SIZE)
            .await
            .map_err(CsiError::transport)?;

        let response: Resp = serde_json::from_slice(&buf).map_err(CsiError::transport)?;
        debug!(%response, "response received");
        Ok(response)
    }

    /// Close the underlying QUIC connection gracefully.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }
}
