//! In-memory key store for tests and throwaway sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use zeroize::Zeroizing;

use super::KeyStore;
use crate::crypto::{b64_decode, b64_encode};
use crate::errors::{GhostableError, Result};

/// A `KeyStore` that keeps base64 entries in a process-local map.
///
/// Nothing survives the process.  Entries are zeroized on removal and
/// when the store is dropped.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Zeroizing<String>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<usize> {
        let entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        Ok(entries.len())
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns `true` if an entry with `name` exists.
    pub fn contains(&self, name: &str) -> Result<bool> {
        let entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        Ok(entries.contains_key(name))
    }

    fn poisoned() -> GhostableError {
        GhostableError::KeyStoreUnavailable("in-memory key store lock poisoned".into())
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        match entries.get(name) {
            Some(encoded) => Ok(Some(Zeroizing::new(b64_decode(name, encoded)?))),
            None => Ok(None),
        }
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        entries.insert(name.to_string(), Zeroizing::new(b64_encode(value)));
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        entries.remove(name);
        Ok(())
    }
}
