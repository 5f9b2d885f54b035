//! Configuration schema and loading.
//!
//! All types derive Serde traits for deserialization from TOML config files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::tls::TlsIdentityPaths;

/// Process-wide transport settings, shared by every endpoint listener that a
/// manager creates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Deadline for reading a request header block plus its body, in
    /// milliseconds.
    pub header_read_timeout_ms: u64,

    /// Listen backlog for every endpoint socket.
    pub accept_backlog: i32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            header_read_timeout_ms: 90_000,
            accept_backlog: 500,
        }
    }
}

/// Per-listener settings supplied by the higher-level listener object.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Folder searched for `<port>.cer` / `<port>.key` certificate pairs.
    /// Defaults to the user configuration directory when unset.
    pub cert_folder: Option<PathBuf>,

    /// Explicitly configured TLS identity, used when no per-port pair is
    /// found in the certificate folder.
    pub tls_identity: Option<TlsIdentityPaths>,

    /// Set `SO_REUSEADDR` on the endpoint socket.
    pub reuse_address: bool,
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Load transport configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<TransportConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}
