//! CLI module: argument parser, output helpers and command implementations.
//!
//! The binary only exposes operations that need no server: managing
//! the local device identity, generating deployment token keys and
//! clearing cached environment keys.

pub mod commands;
pub mod output;

use clap::Parser;

use crate::config::{open_key_store, KeyStoreBackend, Settings};
use crate::errors::Result;
use crate::keystore::KeyStore;

/// Ghostable CLI: zero-knowledge secrets client.
#[derive(Parser)]
#[command(
    name = "ghostable",
    about = "Zero-knowledge secrets client: device identities, deployment tokens and key caches",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Key store backend (overrides .ghostable.toml)
    #[arg(long, value_enum, env = "GHOSTABLE_KEY_STORE", global = true)]
    pub key_store: Option<KeyStoreBackend>,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Manage this machine's device identity
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Manage deployment token key material
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Manage locally cached environment keys
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show version information
    Version,
}

#[derive(clap::Subcommand)]
pub enum DeviceAction {
    /// Create and store a new device identity
    Link {
        /// Display name for this device
        #[arg(long)]
        name: Option<String>,
        /// Use a server-assigned device id instead of a random one
        #[arg(long)]
        device_id: Option<String>,
        /// Derive the encryption key from the signing key
        #[arg(long)]
        derive_encryption_key: bool,
    },

    /// Show the linked identity's public keys and fingerprints
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move the identity to a new device id without regenerating keys
    Rename {
        /// New device id
        device_id: String,
        /// New display name
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete the identity and its private keys
    Unlink {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Subcommand)]
pub enum TokenAction {
    /// Generate a deployment token keypair
    Keygen {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Subcommand)]
pub enum CacheAction {
    /// Forget the cached key for one environment
    Clear {
        /// Project id
        #[arg(long)]
        project: String,
        /// Environment name
        #[arg(short, long)]
        env: String,
    },
}

/// Load `.ghostable.toml` from the current directory.
pub fn load_settings() -> Result<Settings> {
    let cwd = std::env::current_dir()?;
    Settings::load(&cwd)
}

/// Open the key store chosen by `--key-store` or, failing that, settings.
///
/// Called once per invocation; commands receive the result.
pub fn open_store(cli: &Cli, settings: &Settings) -> Result<Box<dyn KeyStore>> {
    let backend = cli.key_store.unwrap_or(settings.key_store);
    if backend == KeyStoreBackend::Memory {
        output::warning("Using the in-memory key store: nothing will be kept after this command.");
    }
    open_key_store(backend)
}
