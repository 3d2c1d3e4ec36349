use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors surfaced by one sync cycle
///
/// "Not modified" is deliberately absent: it is reported as
/// [`SyncOutcome::NotModified`](crate::agent::SyncOutcome) so callers can tell
/// "nothing to do" apart from "failed".
#[derive(Debug, Error)]
pub enum SyncError {
    /// Client certificate, key, CA or device key could not be loaded
    #[error("Unable to load credentials from {}: {reason}", path.display())]
    Credentials { path: PathBuf, reason: String },

    /// Network failure while sending the request or reading the response body
    #[error("Unable to get: {url}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a status we don't handle
    #[error("Unable to get {url} - HTTP_{status}: {body}")]
    Status { url: String, status: u16, body: String },

    /// Check-in attempted by an agent built without a transport
    #[error("No transport configured; this agent can only extract")]
    Offline,

    #[error("Unable to decrypt config bundle")]
    Decrypt(#[from] CryptoError),

    #[error("Unable to parse decrypted config bundle: {0}")]
    Format(String),

    #[error("{context}")]
    Filesystem {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// `with_context` for io results, mapping into [`SyncError::Filesystem`]
pub trait IoContext<T> {
    fn fs_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn fs_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| SyncError::Filesystem {
            context: context(),
            source,
        })
    }
}
