//! Device key handling and bundle decryption.
//!
//! The server encrypts each device's bundle to the public half of the
//! device's P-256 key (the same key the device presents during the TLS
//! handshake). See [`ecies`] for the exact construction.

pub mod ecies;

use std::path::Path;

use p256::SecretKey;
use p256::pkcs8::DecodePrivateKey;
use thiserror::Error;

use crate::error::{Result, SyncError};

pub use ecies::{decrypt, encrypt};

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Ciphertext too short ({0} bytes)")]
    Truncated(usize),

    #[error("Invalid ephemeral public key")]
    InvalidPublicKey,

    #[error("Message authentication failed - wrong key or tampered bundle")]
    InvalidTag,

    #[error("Invalid key material")]
    InvalidKeyLength,
}

/// The device's private key used to open config bundles
pub struct DeviceKey {
    secret: SecretKey,
}

impl DeviceKey {
    pub fn new(secret: SecretKey) -> Self {
        Self { secret }
    }

    /// Load a P-256 key from a PEM file (PKCS#8 or SEC1 "EC PRIVATE KEY")
    pub fn load(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| SyncError::Credentials {
            path: path.to_path_buf(),
            reason: format!("Unable to read private key: {}", e),
        })?;

        Self::from_pem(&pem).map_err(|reason| SyncError::Credentials {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn from_pem(pem: &str) -> std::result::Result<Self, String> {
        if let Ok(secret) = SecretKey::from_pkcs8_pem(pem) {
            return Ok(Self::new(secret));
        }

        SecretKey::from_sec1_pem(pem)
            .map(Self::new)
            .map_err(|e| format!("Unable to parse private key: {}", e))
    }

    pub fn public_key(&self) -> p256::PublicKey {
        self.secret.public_key()
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey").finish_non_exhaustive()
    }
}
