//! Device identity: one signing keypair and one encryption keypair per
//! machine, persisted through the injected `KeyStore`.
//!
//! Private key material is only ever written to the key store; the
//! metadata record holds public keys, fingerprints and the platform so
//! the identity can be displayed without touching private entries.

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::crypto::keys::{fingerprint, fingerprints_match, random_array};
use crate::crypto::signing::{
    self, agreement_key_from_signing_key, agreement_public_key, generate_agreement_key,
    generate_signing_key, parse_agreement_secret, parse_signing_key, AGREEMENT_ALGORITHM,
    SIGNATURE_SIZE, SIGNING_ALGORITHM,
};
use crate::crypto::{b64_decode, b64_encode};
use crate::envelope::{KeyHolder, Recipient, RecipientType};
use crate::errors::{GhostableError, Result};
use crate::keystore::{encryption_key_entry, signing_key_entry, KeyStore, IDENTITY_ENTRY};

/// How the X25519 encryption key is produced.
///
/// The two policies are not interchangeable for security review, so the
/// choice is recorded on the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionKeyPolicy {
    /// A separate random X25519 key.
    #[default]
    Independent,
    /// The X25519 key derived from the Ed25519 seed.
    DerivedFromSigningKey,
}

/// Ed25519 keypair used to sign uploads.
pub struct SigningKeyPair {
    private_key: SigningKey,
}

impl SigningKeyPair {
    pub fn algorithm(&self) -> &'static str {
        SIGNING_ALGORITHM
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.private_key.verifying_key().to_bytes()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key())
    }
}

/// X25519 keypair used to unwrap environment keys.
pub struct EncryptionKeyPair {
    private_key: StaticSecret,
    public_key: X25519PublicKey,
    derived_from_signing_key: bool,
}

impl EncryptionKeyPair {
    pub fn algorithm(&self) -> &'static str {
        AGREEMENT_ALGORITHM
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public_key.to_bytes()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.public_key.as_bytes())
    }

    pub fn derived_from_signing_key(&self) -> bool {
        self.derived_from_signing_key
    }
}

/// A linked device with its private keys loaded.
pub struct DeviceIdentity {
    pub device_id: String,
    pub name: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub signing_key: SigningKeyPair,
    pub encryption_key: EncryptionKeyPair,
}

impl DeviceIdentity {
    /// Sign `message` with the device's Ed25519 key.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        signing::sign(&self.signing_key.private_key, message)
    }

    /// The device as an envelope recipient.
    pub fn recipient(&self) -> Recipient {
        Recipient::device(&self.device_id, self.encryption_key.public_key())
    }

    /// Public, display-safe view of this identity.
    pub fn summary(&self) -> IdentitySummary {
        IdentitySummary {
            device_id: self.device_id.clone(),
            name: self.name.clone(),
            platform: self.platform.clone(),
            created_at: self.created_at,
            signing_public_key: b64_encode(&self.signing_key.public_key()),
            signing_fingerprint: self.signing_key.fingerprint(),
            encryption_public_key: b64_encode(&self.encryption_key.public_key()),
            encryption_fingerprint: self.encryption_key.fingerprint(),
            derived_from_signing_key: self.encryption_key.derived_from_signing_key,
        }
    }
}

impl KeyHolder for DeviceIdentity {
    fn recipient_id(&self) -> &str {
        &self.device_id
    }

    fn recipient_type(&self) -> RecipientType {
        RecipientType::Device
    }

    fn agreement_secret(&self) -> &StaticSecret {
        &self.encryption_key.private_key
    }
}

/// Identity metadata stored under `device:identity`.
///
/// Also what `ghostable device show` prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySummary {
    pub device_id: String,
    pub name: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub signing_public_key: String,
    pub signing_fingerprint: String,
    pub encryption_public_key: String,
    pub encryption_fingerprint: String,
    pub derived_from_signing_key: bool,
}

/// Creates, loads, renames and destroys the local device identity.
pub struct IdentityManager<'a> {
    store: &'a dyn KeyStore,
}

impl<'a> IdentityManager<'a> {
    pub fn new(store: &'a dyn KeyStore) -> Self {
        Self { store }
    }

    /// Generate and persist a new identity.
    ///
    /// `device_id` is used when the server has already assigned one;
    /// otherwise a random `dev_…` identifier is generated.  Fails if an
    /// identity is already linked.
    pub fn create(
        &self,
        name: &str,
        device_id: Option<&str>,
        policy: EncryptionKeyPolicy,
    ) -> Result<DeviceIdentity> {
        if self.read_summary()?.is_some() {
            return Err(GhostableError::CommandFailed(
                "a device identity is already linked — unlink it first".into(),
            ));
        }

        let device_id = match device_id {
            Some(id) => {
                validate_device_id(id)?;
                id.to_string()
            }
            None => generate_device_id(),
        };

        let signing_key = generate_signing_key();
        let (encryption_secret, derived) = match policy {
            EncryptionKeyPolicy::Independent => (generate_agreement_key(), false),
            EncryptionKeyPolicy::DerivedFromSigningKey => {
                (agreement_key_from_signing_key(&signing_key), true)
            }
        };

        let identity = DeviceIdentity {
            device_id,
            name: name.to_string(),
            platform: std::env::consts::OS.to_string(),
            created_at: Utc::now(),
            encryption_key: EncryptionKeyPair {
                public_key: agreement_public_key(&encryption_secret),
                private_key: encryption_secret,
                derived_from_signing_key: derived,
            },
            signing_key: SigningKeyPair {
                private_key: signing_key,
            },
        };

        // Private entries first so a metadata record never points at
        // missing keys.
        self.write_private_keys(&identity)?;
        self.write_summary(&identity.summary())?;

        info!(device_id = %identity.device_id, derived, "created device identity");
        Ok(identity)
    }

    /// Load the linked identity, if any.
    ///
    /// Private keys are checked against the stored public fingerprints.
    pub fn load(&self) -> Result<Option<DeviceIdentity>> {
        let Some(summary) = self.read_summary()? else {
            debug!("no device identity in key store");
            return Ok(None);
        };

        let signing_seed = self
            .store
            .get(&signing_key_entry(&summary.device_id))?
            .ok_or_else(|| {
                GhostableError::KeyStoreUnavailable(format!(
                    "signing key for device '{}' is missing from the key store",
                    summary.device_id
                ))
            })?;
        let encryption_bytes = self
            .store
            .get(&encryption_key_entry(&summary.device_id))?
            .ok_or_else(|| {
                GhostableError::KeyStoreUnavailable(format!(
                    "encryption key for device '{}' is missing from the key store",
                    summary.device_id
                ))
            })?;

        let signing_key = SigningKeyPair {
            private_key: parse_signing_key(&signing_seed)?,
        };
        let encryption_secret = parse_agreement_secret(&encryption_bytes)?;
        let encryption_key = EncryptionKeyPair {
            public_key: agreement_public_key(&encryption_secret),
            private_key: encryption_secret,
            derived_from_signing_key: summary.derived_from_signing_key,
        };

        if !fingerprints_match(&signing_key.fingerprint(), &summary.signing_fingerprint)
            || !fingerprints_match(
                &encryption_key.fingerprint(),
                &summary.encryption_fingerprint,
            )
        {
            return Err(GhostableError::InvalidKey(format!(
                "stored keys for device '{}' do not match its recorded fingerprints",
                summary.device_id
            )));
        }

        Ok(Some(DeviceIdentity {
            device_id: summary.device_id,
            name: summary.name,
            platform: summary.platform,
            created_at: summary.created_at,
            signing_key,
            encryption_key,
        }))
    }

    /// Load the linked identity or fail with `NoIdentity`.
    pub fn require_identity(&self) -> Result<DeviceIdentity> {
        self.load()?.ok_or(GhostableError::NoIdentity)
    }

    /// Public metadata of the linked identity without loading private keys.
    pub fn summary(&self) -> Result<Option<IdentitySummary>> {
        self.read_summary()
    }

    /// Move the identity under a new device id (and optionally a new name).
    ///
    /// Keys are not regenerated.  New private entries are written before
    /// the metadata is switched, and the old entries are removed last.
    pub fn rename(&self, new_device_id: &str, new_name: Option<&str>) -> Result<DeviceIdentity> {
        validate_device_id(new_device_id)?;
        let mut identity = self.require_identity()?;
        let old_device_id = identity.device_id.clone();

        identity.device_id = new_device_id.to_string();
        if let Some(name) = new_name {
            identity.name = name.to_string();
        }

        if old_device_id != identity.device_id {
            self.write_private_keys(&identity)?;
        }
        self.write_summary(&identity.summary())?;

        if old_device_id != identity.device_id {
            self.store.delete(&signing_key_entry(&old_device_id))?;
            self.store.delete(&encryption_key_entry(&old_device_id))?;
        }

        info!(from = %old_device_id, to = %identity.device_id, "renamed device identity");
        Ok(identity)
    }

    /// Delete both private keys and the metadata record.
    ///
    /// Returns `false` if no identity was linked.
    pub fn destroy(&self) -> Result<bool> {
        let Some(summary) = self.read_summary()? else {
            return Ok(false);
        };

        self.store.delete(&signing_key_entry(&summary.device_id))?;
        self.store.delete(&encryption_key_entry(&summary.device_id))?;
        self.store.delete(IDENTITY_ENTRY)?;

        info!(device_id = %summary.device_id, "destroyed device identity");
        Ok(true)
    }

    fn read_summary(&self) -> Result<Option<IdentitySummary>> {
        match self.store.get(IDENTITY_ENTRY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                GhostableError::SerializationError(format!("identity record: {e}"))
            }),
            None => Ok(None),
        }
    }

    fn write_summary(&self, summary: &IdentitySummary) -> Result<()> {
        let bytes = serde_json::to_vec(summary)
            .map_err(|e| GhostableError::SerializationError(format!("identity record: {e}")))?;
        self.store.set(IDENTITY_ENTRY, &bytes)
    }

    fn write_private_keys(&self, identity: &DeviceIdentity) -> Result<()> {
        let seed = zeroize::Zeroizing::new(identity.signing_key.private_key.to_bytes());
        self.store
            .set(&signing_key_entry(&identity.device_id), &seed[..])?;

        let secret = zeroize::Zeroizing::new(identity.encryption_key.private_key.to_bytes());
        self.store
            .set(&encryption_key_entry(&identity.device_id), &secret[..])
    }
}

/// Generate a local device identifier: `dev_` + 16 hex characters.
pub fn generate_device_id() -> String {
    format!("dev_{}", hex::encode(random_array::<8>()))
}

/// Device ids become part of key-store entry names, so keep them simple.
fn validate_device_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(GhostableError::CommandFailed(
            "device id must be between 1 and 128 characters".into(),
        ));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(GhostableError::CommandFailed(format!(
            "device id '{id}' contains invalid characters — only ASCII letters, digits, underscores, hyphens, and periods are allowed"
        )));
    }
    Ok(())
}

/// Decode a base64 X25519 public key from a server record.
pub(crate) fn decode_public_key(field: &str, encoded: &str) -> Result<[u8; 32]> {
    let bytes = b64_decode(field, encoded)?;
    Ok(signing::parse_agreement_public_key(&bytes)?.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;

    #[test]
    fn create_then_load_roundtrip() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);

        let created = manager
            .create("laptop", None, EncryptionKeyPolicy::Independent)
            .unwrap();
        assert!(created.device_id.starts_with("dev_"));
        assert_eq!(created.signing_key.algorithm(), "Ed25519");
        assert_eq!(created.encryption_key.algorithm(), "X25519");

        let loaded = manager.require_identity().unwrap();
        assert_eq!(loaded.device_id, created.device_id);
        assert_eq!(loaded.signing_key.public_key(), created.signing_key.public_key());
        assert_eq!(
            loaded.encryption_key.public_key(),
            created.encryption_key.public_key()
        );
        assert!(!loaded.encryption_key.derived_from_signing_key());
    }

    #[test]
    fn require_identity_without_link_fails() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        assert!(matches!(
            manager.require_identity(),
            Err(GhostableError::NoIdentity)
        ));
    }

    #[test]
    fn create_twice_fails() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        manager
            .create("a", None, EncryptionKeyPolicy::Independent)
            .unwrap();
        assert!(manager
            .create("b", None, EncryptionKeyPolicy::Independent)
            .is_err());
    }

    #[test]
    fn derived_policy_is_recorded_and_reproducible() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        let identity = manager
            .create("ci", Some("dev_ci"), EncryptionKeyPolicy::DerivedFromSigningKey)
            .unwrap();

        assert!(identity.encryption_key.derived_from_signing_key());
        let expected = agreement_key_from_signing_key(&identity.signing_key.private_key);
        assert_eq!(
            identity.encryption_key.public_key(),
            agreement_public_key(&expected).to_bytes()
        );

        let loaded = manager.require_identity().unwrap();
        assert!(loaded.encryption_key.derived_from_signing_key());
    }

    #[test]
    fn private_keys_live_under_device_scoped_entries() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        manager
            .create("laptop", Some("dev_abc"), EncryptionKeyPolicy::Independent)
            .unwrap();

        assert!(store.contains("device:dev_abc:signing").unwrap());
        assert!(store.contains("device:dev_abc:encryption").unwrap());
        assert!(store.contains(IDENTITY_ENTRY).unwrap());
    }

    #[test]
    fn missing_private_key_is_reported_as_unavailable() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        manager
            .create("laptop", Some("dev_abc"), EncryptionKeyPolicy::Independent)
            .unwrap();

        store.delete(&signing_key_entry("dev_abc")).unwrap();
        let err = manager.load().err().unwrap();
        assert!(matches!(err, GhostableError::KeyStoreUnavailable(_)));
        assert!(err.to_string().contains("signing key"));
    }

    #[test]
    fn missing_encryption_key_is_reported_as_unavailable() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        manager
            .create("laptop", Some("dev_abc"), EncryptionKeyPolicy::Independent)
            .unwrap();

        store.delete(&encryption_key_entry("dev_abc")).unwrap();
        assert!(matches!(
            manager.load(),
            Err(GhostableError::KeyStoreUnavailable(_))
        ));
    }

    #[test]
    fn rename_moves_keys_without_regenerating() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        let before = manager
            .create("laptop", Some("local-1"), EncryptionKeyPolicy::Independent)
            .unwrap();

        let after = manager.rename("srv_42", Some("work laptop")).unwrap();
        assert_eq!(after.device_id, "srv_42");
        assert_eq!(after.name, "work laptop");
        assert_eq!(after.signing_key.public_key(), before.signing_key.public_key());

        assert!(!store.contains("device:local-1:signing").unwrap());
        assert!(!store.contains("device:local-1:encryption").unwrap());
        assert!(store.contains("device:srv_42:signing").unwrap());

        let loaded = manager.require_identity().unwrap();
        assert_eq!(loaded.device_id, "srv_42");
        assert_eq!(
            loaded.encryption_key.public_key(),
            before.encryption_key.public_key()
        );
    }

    #[test]
    fn rename_rejects_unsafe_ids() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        manager
            .create("laptop", None, EncryptionKeyPolicy::Independent)
            .unwrap();
        assert!(manager.rename("bad:id", None).is_err());
        assert!(manager.rename("", None).is_err());
    }

    #[test]
    fn destroy_removes_everything() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        manager
            .create("laptop", None, EncryptionKeyPolicy::Independent)
            .unwrap();

        assert!(manager.destroy().unwrap());
        assert!(store.is_empty().unwrap());
        assert!(!manager.destroy().unwrap());
        assert!(matches!(
            manager.require_identity(),
            Err(GhostableError::NoIdentity)
        ));
    }

    #[test]
    fn load_detects_swapped_private_key() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        manager
            .create("laptop", Some("dev_x"), EncryptionKeyPolicy::Independent)
            .unwrap();

        store.set("device:dev_x:encryption", &[5u8; 32]).unwrap();
        assert!(matches!(
            manager.load(),
            Err(GhostableError::InvalidKey(_))
        ));
    }

    #[test]
    fn summary_exposes_only_public_material() {
        let store = MemoryKeyStore::new();
        let manager = IdentityManager::new(&store);
        let identity = manager
            .create("laptop", None, EncryptionKeyPolicy::Independent)
            .unwrap();

        let summary = manager.summary().unwrap().unwrap();
        assert_eq!(summary, identity.summary());
        assert_eq!(
            decode_public_key("encryptionPublicKey", &summary.encryption_public_key).unwrap(),
            identity.encryption_key.public_key()
        );
    }

    #[test]
    fn device_signature_verifies_with_public_key() {
        let store = MemoryKeyStore::new();
        let identity = IdentityManager::new(&store)
            .create("laptop", None, EncryptionKeyPolicy::Independent)
            .unwrap();
        let sig = identity.sign(b"payload");
        assert!(signing::verify(
            &identity.signing_key.public_key(),
            b"payload",
            &sig
        ));
    }
}
