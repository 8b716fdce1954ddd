//! QUIC transport.
//!
//! [`QuicClient`] and [`QuicServer`] exchange one JSON request and one JSON
//! response per bi-directional stream using `quinn`. The same framing serves
//! the node RPC ([`CsiMessage`](crate::message::CsiMessage)) and the mount
//! proxy ([`MountRequest`](crate::message::MountRequest)).

pub mod client;
pub mod server;

pub use client::QuicClient;
pub use server::{CsiDispatcher, QuicServer, RequestHandler};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::CsiError;

/// Upper bound on a single request or response body.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// TLS 1.3 client configuration trusting `roots`.
pub fn client_config(
    roots: impl IntoIterator<Item = CertificateDer<'static>>,
) -> Result<rustls::ClientConfig, CsiError> {
    let mut store = rustls::RootCertStore::empty();
    for cert in roots {
        store
            .add(cert)
            .map_err(|e| CsiError::TransportError(format!("invalid root certificate: {e}")))?;
    }
    let config = rustls::ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(CsiError::transport)?
        .with_root_certificates(store)
        .with_no_client_auth();
    Ok(config)
}

/// TLS 1.3 server configuration presenting `chain`.
pub fn server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<rustls::ServerConfig, CsiError> {
    rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(CsiError::transport)?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| CsiError::TransportError(format!("invalid server certificate: {e}")))
}

/// Read every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CsiError> {
    let file = File::open(path)
        .map_err(|e| CsiError::TransportError(format!("open {}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CsiError::TransportError(format!("parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(CsiError::TransportError(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Read the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CsiError> {
    let file = File::open(path)
        .map_err(|e| CsiError::TransportError(format!("open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| CsiError::TransportError(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| CsiError::TransportError(format!("no private key found in {}", path.display())))
}
