//! Trust configuration for dialing the daemon.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::{ClientError, Result};

/// Build a connector that trusts only the certificates in `ca_pem`.
///
/// A self-signed daemon certificate can be passed here directly.
pub fn connector_from_pem(ca_pem: &[u8]) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(ca_pem) {
        let cert = cert.map_err(|e| ClientError::Certificate(e.to_string()))?;
        roots
            .add(cert)
            .map_err(|e| ClientError::Certificate(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(ClientError::Certificate("no certificates found".into()));
    }

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ClientError::Certificate(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Read a PEM CA bundle from disk and build a connector from it.
pub fn load_connector(ca_path: &Path) -> Result<TlsConnector> {
    let pem = std::fs::read(ca_path).map_err(|e| ClientError::file(ca_path, e))?;
    connector_from_pem(&pem)
}
