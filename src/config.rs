use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the agent configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/config-agent/agent.toml";

/// Environment variable overriding the server URL
pub const CONFIG_URL_ENV: &str = "CONFIG_URL";

/// Agent configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the agent talks to and where it keeps its files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    /// Holds client.pem, pkey.pem, root.crt and the encrypted bundle
    #[serde(default = "default_sota_dir")]
    pub sota_dir: PathBuf,

    /// Directory the decrypted secrets are written to (must exist)
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: PathBuf,

    #[serde(default = "default_config_url")]
    pub config_url: String,
}

/// Polling settings for `daemon` mode
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonSettings {
    /// How often to check in (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Add random jitter to prevent thundering herd (seconds)
    #[serde(default = "default_jitter")]
    pub poll_jitter: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_sota_dir() -> PathBuf {
    PathBuf::from("/var/sota")
}

fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/run/secrets")
}

fn default_config_url() -> String {
    "https://ota-lite.foundries.io:8443/config".to_string()
}

fn default_poll_interval() -> u64 {
    300 // 5 minutes
}

fn default_jitter() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            sota_dir: default_sota_dir(),
            secrets_dir: default_secrets_dir(),
            config_url: default_config_url(),
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            poll_jitter: default_jitter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from file, falling back to defaults if it doesn't exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Apply the `CONFIG_URL` override, if set and non-empty
    pub fn apply_env_url(&mut self, env_url: Option<String>) {
        if let Some(url) = env_url.filter(|u| !u.is_empty()) {
            self.agent.config_url = url;
        }
    }

    /// Path of the persisted encrypted bundle
    pub fn encrypted_config_path(&self) -> PathBuf {
        self.agent.sota_dir.join("config.encrypted")
    }

    /// Path of the device private key
    pub fn private_key_path(&self) -> PathBuf {
        self.agent.sota_dir.join("pkey.pem")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.agent.config_url).context("Invalid config URL")?;

        if url.scheme() != "https" && url.scheme() != "http" {
            anyhow::bail!("Config URL must use HTTP(S) (got: {})", url.scheme());
        }

        if url.scheme() == "http" {
            tracing::warn!("Config URL is not using HTTPS; client certificates will not be used");
        }

        if self.daemon.poll_interval < 60 {
            anyhow::bail!(
                "Poll interval must be at least 60 seconds (got: {})",
                self.daemon.poll_interval
            );
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
