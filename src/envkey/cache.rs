//! Local cache of environment keys in the key store.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::keys::{fingerprints_match, KeyMaterial};
use crate::crypto::{b64_decode, b64_encode};
use crate::errors::{GhostableError, Result};
use crate::keystore::{environment_key_entry, KeyStore};

/// Cached key as stored under `environment_key_entry(project, env)`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedKeyRecord {
    key_bytes_b64: String,
    version: u64,
    fingerprint: String,
}

pub(crate) struct CachedKey {
    pub(crate) key: KeyMaterial,
    pub(crate) version: u64,
    pub(crate) fingerprint: String,
}

/// Read-through cache of the last environment key seen per
/// (project, environment).
pub struct KeyCache<'a> {
    store: &'a dyn KeyStore,
}

impl<'a> KeyCache<'a> {
    pub fn new(store: &'a dyn KeyStore) -> Self {
        Self { store }
    }

    /// Returns `true` if a record exists, valid or not.
    pub fn contains(&self, project_id: &str, env: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&environment_key_entry(project_id, env))?
            .is_some())
    }

    /// Load the cached key.  Unreadable records and records whose key
    /// does not hash to the stored fingerprint count as missing.
    pub(crate) fn read(&self, project_id: &str, env: &str) -> Result<Option<CachedKey>> {
        let Some(bytes) = self.store.get(&environment_key_entry(project_id, env))? else {
            debug!(project = project_id, env, "environment key cache miss");
            return Ok(None);
        };

        let record: CachedKeyRecord = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!(project = project_id, env, error = %e, "ignoring unreadable cached key");
                return Ok(None);
            }
        };
        let key = match b64_decode("keyBytesB64", &record.key_bytes_b64)
            .and_then(|raw| KeyMaterial::from_slice(&raw))
        {
            Ok(k) => k,
            Err(e) => {
                warn!(project = project_id, env, error = %e, "ignoring malformed cached key");
                return Ok(None);
            }
        };
        if !fingerprints_match(&key.fingerprint(), &record.fingerprint) {
            warn!(project = project_id, env, "cached key does not match its fingerprint");
            return Ok(None);
        }

        Ok(Some(CachedKey {
            key,
            version: record.version,
            fingerprint: record.fingerprint,
        }))
    }

    pub(crate) fn write(
        &self,
        project_id: &str,
        env: &str,
        key: &KeyMaterial,
        version: u64,
    ) -> Result<()> {
        let record = CachedKeyRecord {
            key_bytes_b64: b64_encode(key.as_bytes()),
            version,
            fingerprint: key.fingerprint(),
        };
        let json = Zeroizing::new(
            serde_json::to_vec(&record)
                .map_err(|e| GhostableError::SerializationError(format!("cached key: {e}")))?,
        );
        self.store.set(&environment_key_entry(project_id, env), &json)
    }

    /// Remove the cached key.  Removing a missing entry is not an error.
    pub fn invalidate(&self, project_id: &str, env: &str) -> Result<()> {
        debug!(project = project_id, env, "invalidating cached environment key");
        self.store.delete(&environment_key_entry(project_id, env))
    }
}
