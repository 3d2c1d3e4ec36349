//! Device config agent.
//!
//! Syncs this device's encrypted configuration bundle from the config
//! server, decrypts it with the device key and materializes each entry as a
//! file in the secrets directory.

pub mod agent;
pub mod bundle;
pub mod cli;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod error;
pub mod extract;
pub mod platform;
pub mod transport;

pub use agent::{Agent, SyncOutcome};
pub use error::{Result, SyncError};
