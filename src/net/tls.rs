//! TLS configuration and certificate resolution.
//!
//! Resolution is a two-tier policy: a `<port>.cer` / `<port>.key` pair in
//! the certificate folder wins, the explicitly configured identity is the
//! fallback, and `CertificateNotFound` surfaces only when both tiers miss.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};

/// Paths of an explicitly configured server identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsIdentityPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// The default folder searched for per-port certificate pairs.
pub fn default_cert_folder() -> Option<PathBuf> {
    dirs::config_dir()
}

/// True when a `<port>.cer` / `<port>.key` pair exists in the folder.
pub fn certificate_exists(port: u16, folder: Option<&Path>) -> bool {
    let Some(folder) = folder.map(Path::to_path_buf).or_else(default_cert_folder) else {
        return false;
    };

    folder.join(format!("{}.cer", port)).exists() && folder.join(format!("{}.key", port)).exists()
}

/// Resolve the server identity for a secure endpoint and build an acceptor.
///
/// Load failures inside a tier are logged and demote resolution to the next
/// tier; only a miss on both tiers is an error.
pub fn resolve_server_identity(
    port: u16,
    folder: Option<&Path>,
    fallback: Option<&TlsIdentityPaths>,
) -> Result<TlsAcceptor> {
    if let Some(folder) = folder.map(Path::to_path_buf).or_else(default_cert_folder) {
        let cert_path = folder.join(format!("{}.cer", port));
        let key_path = folder.join(format!("{}.key", port));

        if cert_path.exists() && key_path.exists() {
            match build_acceptor(&cert_path, &key_path) {
                Ok(acceptor) => {
                    tracing::debug!(port, folder = %folder.display(), "Per-port certificate resolved");
                    return Ok(acceptor);
                }
                Err(e) => {
                    tracing::warn!(port, error = %e, "Per-port certificate unusable, trying fallback");
                }
            }
        }
    }

    if let Some(identity) = fallback {
        match build_acceptor(&identity.cert_path, &identity.key_path) {
            Ok(acceptor) => {
                tracing::debug!(port, "Configured fallback certificate resolved");
                return Ok(acceptor);
            }
            Err(e) => {
                tracing::warn!(port, error = %e, "Configured fallback certificate unusable");
            }
        }
    }

    Err(Error::CertificateNotFound(port))
}

fn build_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let bytes = std::fs::read(path)?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut bytes.as_slice()).collect::<std::result::Result<_, _>>()?;

    if !certs.is_empty() {
        return Ok(certs);
    }

    // Not PEM; treat the file as a single DER certificate.
    Ok(vec![CertificateDer::from(bytes)])
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let bytes = std::fs::read(path)?;

    if let Some(key) = rustls_pemfile::private_key(&mut bytes.as_slice())? {
        return Ok(key);
    }

    // Not PEM; treat the file as a DER-encoded key.
    PrivateKeyDer::try_from(bytes)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}
