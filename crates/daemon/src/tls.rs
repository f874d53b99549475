//! TLS material for the listener.
//!
//! Certificates and keys are PEM files. [`load_acceptor`] turns them into a
//! [`TlsAcceptor`]; [`generate_self_signed`] writes a fresh pair for hosts
//! that have no certificate authority.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

/// Errors raised while loading or generating TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A PEM file could not be read or written.
    #[error("{path}: {source}")]
    Io {
        /// The file involved.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The certificate file held no usable certificate.
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// The key file held no usable private key.
    #[error("invalid private key: {0}")]
    PrivateKey(String),

    /// rustls rejected the certificate/key pair.
    #[error("TLS configuration error: {0}")]
    Config(String),

    /// Self-signed certificate generation failed.
    #[error("certificate generation failed: {0}")]
    Generate(String),
}

/// Parse PEM-encoded certificates.
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(TlsError::Certificate("no certificates found".into()));
    }
    Ok(certs)
}

/// Parse a PEM-encoded private key.
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| TlsError::PrivateKey(format!("failed to parse private key: {e}")))
}

/// Build a server configuration from PEM bytes. Clients are not asked for
/// certificates; they authenticate with a login and password instead.
pub fn server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<ServerConfig, TlsError> {
    let certs = parse_certificates(cert_pem)?;
    let key = parse_private_key(key_pem)?;

    ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(e.to_string()))
}

/// Load a certificate chain and key from disk into an acceptor.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let cert_pem = read_pem(cert_path)?;
    let key_pem = read_pem(key_path)?;
    let acceptor = acceptor_from_pem(&cert_pem, &key_pem)?;

    tracing::info!(cert = %cert_path.display(), "Loaded TLS certificate");
    Ok(acceptor)
}

/// Build an acceptor from in-memory PEM bytes.
pub fn acceptor_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<TlsAcceptor, TlsError> {
    Ok(TlsAcceptor::from(Arc::new(server_config(cert_pem, key_pem)?)))
}

/// A generated certificate and key, both PEM-encoded.
#[derive(Debug, Clone)]
pub struct GeneratedCert {
    /// Certificate PEM; also serves as the client's trust anchor.
    pub cert_pem: String,
    /// Private key PEM.
    pub key_pem: String,
}

/// Generate a self-signed certificate valid for `hosts` (DNS names or IPs).
pub fn generate_self_signed(hosts: &[String]) -> Result<GeneratedCert, TlsError> {
    let certified = rcgen::generate_simple_self_signed(hosts.to_vec())
        .map_err(|e| TlsError::Generate(e.to_string()))?;

    Ok(GeneratedCert {
        cert_pem: certified.cert.pem(),
        key_pem: certified.key_pair.serialize_pem(),
    })
}

/// Write a generated pair to disk, creating parent directories.
///
/// Refuses to overwrite existing files unless `force` is set.
pub fn write_generated(
    generated: &GeneratedCert,
    cert_path: &Path,
    key_path: &Path,
    force: bool,
) -> Result<(), TlsError> {
    for path in [cert_path, key_path] {
        if path.exists() && !force {
            return Err(TlsError::Io {
                path: path.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "file exists (use --force to overwrite)",
                ),
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| TlsError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
    }

    write_file(cert_path, generated.cert_pem.as_bytes())?;
    write_file(key_path, generated.key_pem.as_bytes())?;
    restrict_permissions(key_path)?;
    Ok(())
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), TlsError> {
    fs::write(path, contents).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), TlsError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
        TlsError::Io {
            path: path.display().to_string(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), TlsError> {
    Ok(())
}
