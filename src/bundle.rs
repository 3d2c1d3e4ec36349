use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path};

use crate::crypto::{self, DeviceKey};
use crate::error::{IoContext, Result, SyncError};

/// Current bundle payload version
pub const BUNDLE_VERSION: u32 = 1;

/// Decrypted bundle: logical file name -> entry
pub type DecryptedBundle = BTreeMap<String, ConfigEntry>;

/// A single secret plus the command to run when it changes
///
/// Values travel as JSON strings, so a secret is limited to UTF-8 text; the
/// file written is exactly the value's UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigEntry {
    #[serde(alias = "Value")]
    pub value: String,

    #[serde(default, alias = "OnChanged", skip_serializing_if = "Vec::is_empty")]
    pub on_changed: Vec<String>,
}

impl ConfigEntry {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            on_changed: Vec::new(),
        }
    }

    pub fn with_on_changed<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_changed = argv.into_iter().map(Into::into).collect();
        self
    }
}

/// On-the-wire payload: a versioned envelope, or a bare map from older servers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Versioned {
        version: u32,
        files: DecryptedBundle,
    },
    Legacy(DecryptedBundle),
}

/// Versioned envelope as produced by [`serialize`]
#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    files: &'a DecryptedBundle,
}

/// Parse a decrypted payload into a bundle
pub fn parse(plaintext: &[u8]) -> Result<DecryptedBundle> {
    let payload: Payload = serde_json::from_slice(plaintext).map_err(|e| {
        SyncError::Format(format!("not a valid bundle document: {}", e))
    })?;

    let files = match payload {
        Payload::Versioned { version, files } if version == BUNDLE_VERSION => files,
        Payload::Versioned { version, .. } => {
            return Err(SyncError::Format(format!(
                "unsupported bundle version {} (expected {})",
                version, BUNDLE_VERSION
            )));
        }
        Payload::Legacy(files) => files,
    };

    for name in files.keys() {
        validate_name(name)?;
    }

    Ok(files)
}

/// Serialize a bundle as a versioned payload
pub fn serialize(bundle: &DecryptedBundle) -> Result<Vec<u8>> {
    serde_json::to_vec(&Envelope {
        version: BUNDLE_VERSION,
        files: bundle,
    })
    .map_err(|e| SyncError::Format(format!("unable to serialize bundle: {}", e)))
}

/// Read and decrypt the bundle at `path`
///
/// Only reads; nothing on disk is changed.
pub fn decrypt_bundle(key: &DeviceKey, path: &Path) -> Result<DecryptedBundle> {
    let sealed = std::fs::read(path)
        .fs_context(|| format!("Unable to read config bundle {}", path.display()))?;

    let plaintext = crypto::decrypt(key, &sealed)?;
    parse(&plaintext)
}

/// Entry names become file names directly under the secrets directory
fn validate_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(SyncError::Format(format!(
            "invalid entry name {:?}: must be a plain file name",
            name
        ))),
    }
}
