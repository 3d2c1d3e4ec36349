use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

/// Device config agent
///
/// Fetches this device's encrypted configuration bundle over mutual TLS,
/// decrypts it with the device key and writes each entry to the secrets
/// directory, running on-change hooks for entries that changed.
#[derive(Parser, Debug)]
#[command(name = "config-agent")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the agent configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Directory holding client.pem, pkey.pem, root.crt and the bundle
    #[arg(long, global = true)]
    pub sota_dir: Option<PathBuf>,

    /// Directory to extract secrets into (must exist)
    #[arg(long, global = true)]
    pub secrets_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Check in with the server once and extract any new config (default)
    CheckIn,
    /// Extract the bundle already on disk without contacting the server
    Extract,
    /// Check in periodically until stopped
    Daemon,
    /// Show where the agent stands: server, bundle age, secrets
    Status,
    /// Print the effective configuration
    ShowConfig,
}
