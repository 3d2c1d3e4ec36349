use reqwest::{Certificate, Client, Identity};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Per-request timeout for all calls to the config server
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PEM artifacts presented during the mutual TLS handshake
#[derive(Debug, Clone)]
pub struct TlsCredentials {
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub ca_cert: PathBuf,
}

impl TlsCredentials {
    /// Standard layout of a provisioned sota directory
    pub fn from_sota_dir(sota_dir: &Path) -> Self {
        Self {
            client_cert: sota_dir.join("client.pem"),
            client_key: sota_dir.join("pkey.pem"),
            ca_cert: sota_dir.join("root.crt"),
        }
    }
}

/// Build an HTTP client bound to the device's mutual TLS identity
///
/// Only the deployment CA is trusted; the built-in web roots are disabled.
pub fn build_client(credentials: &TlsCredentials) -> Result<Client> {
    let cert = read_pem(&credentials.client_cert)?;
    let key = read_pem(&credentials.client_key)?;
    let ca = read_pem(&credentials.ca_cert)?;

    let mut identity_pem = cert;
    if !identity_pem.ends_with(b"\n") {
        identity_pem.push(b'\n');
    }
    identity_pem.extend_from_slice(&key);

    let identity = Identity::from_pem(&identity_pem).map_err(|e| SyncError::Credentials {
        path: credentials.client_cert.clone(),
        reason: format!("Invalid client certificate or key: {}", e),
    })?;

    let ca = Certificate::from_pem(&ca).map_err(|e| SyncError::Credentials {
        path: credentials.ca_cert.clone(),
        reason: format!("Invalid CA certificate: {}", e),
    })?;

    let client = Client::builder()
        .use_rustls_tls()
        .user_agent(format!("config-agent/{}", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .tls_built_in_root_certs(false)
        .add_root_certificate(ca)
        .identity(identity)
        .build()
        .map_err(|e| SyncError::Credentials {
            path: credentials.client_cert.clone(),
            reason: format!("Failed to create HTTP client: {}", e),
        })?;

    tracing::debug!(
        "TLS client ready (cert: {}, ca: {})",
        credentials.client_cert.display(),
        credentials.ca_cert.display()
    );

    Ok(client)
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| SyncError::Credentials {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
