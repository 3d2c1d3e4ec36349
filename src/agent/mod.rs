// Agent: one device, one config server, one secrets directory.
//
// A sync cycle fetches the encrypted bundle conditionally on its last
// modification time, persists it atomically, decrypts it with the device key
// and extracts every entry into the secrets directory.

mod daemon;
mod scheduler;
mod sync;

use reqwest::Client;
use std::path::{Path, PathBuf};

use crate::bundle;
use crate::config::AgentConfig;
use crate::crypto::DeviceKey;
use crate::error::Result;
use crate::extract::{self, ExtractSummary};
use crate::transport::{self, TlsCredentials};

pub use daemon::run_daemon;
pub use scheduler::PollingScheduler;
pub use sync::{format_http_date, parse_http_date};

/// Result of one sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new bundle was downloaded and extracted
    Updated(ExtractSummary),
    /// Server reported no change (304) or no config for this device (204)
    NotModified,
}

/// Process-wide agent state, immutable once built
pub struct Agent {
    private_key: DeviceKey,
    encrypted_config: PathBuf,
    secrets_dir: PathBuf,
    client: Option<Client>,
    config_url: String,
}

impl Agent {
    /// Build an agent with a mutual TLS transport
    ///
    /// Fails if the client certificate, key, CA or device key can't be loaded.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client =
            transport::build_client(&TlsCredentials::from_sota_dir(&config.agent.sota_dir))?;
        let private_key = DeviceKey::load(&config.private_key_path())?;

        Ok(Self::from_parts(config, private_key, Some(client)))
    }

    /// Build an agent that can only extract the bundle already on disk
    pub fn offline(config: &AgentConfig) -> Result<Self> {
        let private_key = DeviceKey::load(&config.private_key_path())?;
        Ok(Self::from_parts(config, private_key, None))
    }

    pub fn from_parts(config: &AgentConfig, private_key: DeviceKey, client: Option<Client>) -> Self {
        Self {
            private_key,
            encrypted_config: config.encrypted_config_path(),
            secrets_dir: config.agent.secrets_dir.clone(),
            client,
            config_url: config.agent.config_url.clone(),
        }
    }

    pub fn encrypted_config(&self) -> &Path {
        &self.encrypted_config
    }

    pub fn secrets_dir(&self) -> &Path {
        &self.secrets_dir
    }

    pub fn config_url(&self) -> &str {
        &self.config_url
    }

    /// Decrypt the persisted bundle and extract it into the secrets directory
    pub fn extract(&self) -> Result<ExtractSummary> {
        let bundle = bundle::decrypt_bundle(&self.private_key, &self.encrypted_config)?;
        let summary = extract::extract(&bundle, &self.secrets_dir)?;

        tracing::info!(
            "Extracted {} secrets ({} written, {} unchanged, {} hook failures)",
            bundle.len(),
            summary.written,
            summary.unchanged,
            summary.hook_failures
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{ConfigEntry, DecryptedBundle};
    use crate::crypto;
    use crate::error::SyncError;
    use p256::SecretKey;
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use rand::rngs::OsRng;
    use tempfile::tempdir;

    fn config_for(sota: &Path, secrets: &Path) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.agent.sota_dir = sota.to_path_buf();
        config.agent.secrets_dir = secrets.to_path_buf();
        config
    }

    #[test]
    fn offline_agent_extracts_persisted_bundle() {
        let sota = tempdir().unwrap();
        let secrets = tempdir().unwrap();
        let config = config_for(sota.path(), secrets.path());

        let secret = SecretKey::random(&mut OsRng);
        std::fs::write(
            config.private_key_path(),
            secret.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes(),
        )
        .unwrap();

        let mut b = DecryptedBundle::new();
        b.insert("a.conf".to_string(), ConfigEntry::new("v1"));
        let sealed =
            crypto::encrypt(&secret.public_key(), &bundle::serialize(&b).unwrap()).unwrap();
        std::fs::write(config.encrypted_config_path(), sealed).unwrap();

        let agent = Agent::offline(&config).unwrap();
        let summary = agent.extract().unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(std::fs::read_to_string(secrets.path().join("a.conf")).unwrap(), "v1");
    }

    #[test]
    fn agent_without_credentials_cannot_be_built() {
        let sota = tempdir().unwrap();
        let secrets = tempdir().unwrap();
        let config = config_for(sota.path(), secrets.path());

        assert!(matches!(Agent::new(&config), Err(SyncError::Credentials { .. })));
        assert!(matches!(Agent::offline(&config), Err(SyncError::Credentials { .. })));
    }

    #[test]
    fn extract_without_secrets_dir_is_filesystem_error() {
        let sota = tempdir().unwrap();
        let config = config_for(sota.path(), &sota.path().join("missing"));
        let key = DeviceKey::new(SecretKey::random(&mut OsRng));

        let mut b = DecryptedBundle::new();
        b.insert("a.conf".to_string(), ConfigEntry::new("v1"));
        let sealed =
            crypto::encrypt(&key.public_key(), &bundle::serialize(&b).unwrap()).unwrap();
        std::fs::write(config.encrypted_config_path(), sealed).unwrap();

        let agent = Agent::from_parts(&config, key, None);

        match agent.extract() {
            Err(SyncError::Filesystem { context, .. }) => {
                assert!(context.starts_with("Secrets directory unavailable"));
            }
            other => panic!("expected filesystem error, got {:?}", other),
        }
        assert!(!sota.path().join("missing").exists());
    }
}
