//! OS credential store backend.
//!
//! Stores entries in the operating system's secure credential store:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: kernel keyutils / Secret Service
//!
//! Any failure to reach the store surfaces as `KeyStoreUnavailable`;
//! there is no silent fallback to weaker storage.

use zeroize::Zeroizing;

use super::KeyStore;
use crate::crypto::{b64_decode, b64_encode};
use crate::errors::{GhostableError, Result};

/// Default service name used in the OS keyring.
pub const DEFAULT_SERVICE: &str = "ghostable";

/// A `KeyStore` backed by the `keyring` crate.
pub struct OsKeyStore {
    service: String,
}

impl OsKeyStore {
    pub fn new() -> Self {
        Self::with_service(DEFAULT_SERVICE)
    }

    /// Use a custom service name (separates profiles on one machine).
    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name).map_err(|e| {
            GhostableError::KeyStoreUnavailable(format!("failed to create keyring entry: {e}"))
        })
    }
}

impl Default for OsKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for OsKeyStore {
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.entry(name)?.get_password() {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                Ok(Some(Zeroizing::new(b64_decode(name, &encoded)?)))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(GhostableError::KeyStoreUnavailable(format!(
                "failed to read '{name}' from keyring: {e}"
            ))),
        }
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<()> {
        let encoded = Zeroizing::new(b64_encode(value));
        self.entry(name)?.set_password(&encoded).map_err(|e| {
            GhostableError::KeyStoreUnavailable(format!("failed to store '{name}' in keyring: {e}"))
        })
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already gone, that's fine.
            Err(e) => Err(GhostableError::KeyStoreUnavailable(format!(
                "failed to delete '{name}' from keyring: {e}"
            ))),
        }
    }
}
