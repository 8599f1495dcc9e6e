//! Key material and HKDF-SHA256 derivation helpers.
//!
//! One 32-byte environment key fans out into independent per-scope
//! keys:
//! - an **encryption key** for secret values, and
//! - an **HMAC key** for value claims (drift checks without decrypting).
//!
//! The scope string `org/project/env` is mixed into the HKDF salt as
//! `"ghostable:" + scope`, with empty `info`, and 64 output bytes are
//! split in half.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::errors::{GhostableError, Result};

/// Length of symmetric keys (256 bits).
pub const KEY_LEN: usize = 32;

/// Domain-separation prefix for scoped derivation salts.
const SCOPE_SALT_PREFIX: &str = "ghostable:";

/// Return `n` cryptographically secure random bytes.
pub fn random_bytes(n: usize) -> Zeroizing<Vec<u8>> {
    let mut buf = Zeroizing::new(vec![0u8; n]);
    rand::rng().fill_bytes(&mut buf[..]);
    buf
}

/// Fill a fixed-size array with random bytes.
pub(crate) fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// Hex-encoded SHA-256 digest, used as a comparable identity for keys.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare two fingerprints in constant time.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Encryption and integrity keys for one `org/project/env` scope.
///
/// Both keys are wiped when the value is dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ScopedKeys {
    pub enc_key: [u8; KEY_LEN],
    pub hmac_key: [u8; KEY_LEN],
}

/// Derive the scoped `(enc_key, hmac_key)` pair from a master key.
///
/// Pure: identical inputs always give identical keys, and different
/// scopes give unrelated pairs.
pub fn derive_scoped_keys(master_key: &[u8], scope: &str) -> Result<ScopedKeys> {
    let salt = format!("{SCOPE_SALT_PREFIX}{scope}");
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), master_key);

    let mut okm = Zeroizing::new([0u8; KEY_LEN * 2]);
    hk.expand(&[], &mut okm[..])
        .map_err(|e| GhostableError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    let mut keys = ScopedKeys {
        enc_key: [0u8; KEY_LEN],
        hmac_key: [0u8; KEY_LEN],
    };
    keys.enc_key.copy_from_slice(&okm[..KEY_LEN]);
    keys.hmac_key.copy_from_slice(&okm[KEY_LEN..]);
    Ok(keys)
}

/// HKDF-SHA256 with no salt, producing a single 32-byte key for `info`.
pub(crate) fn hkdf_expand(ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| GhostableError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

/// HMAC-SHA256 of `message` under `key`.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| GhostableError::KeyDerivationFailed(format!("invalid HMAC key: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify an HMAC-SHA256 tag in constant time.
pub fn verify_hmac_sha256(key: &[u8], message: &[u8], expected: &[u8]) -> Result<bool> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| GhostableError::KeyDerivationFailed(format!("invalid HMAC key: {e}")))?;
    mac.update(message);
    Ok(mac.verify_slice(expected).is_ok())
}

/// A 32-byte environment key that zeroes its memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; KEY_LEN],
}

impl KeyMaterial {
    /// Create a `KeyMaterial` from raw bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self::new(random_array())
    }

    /// Build from a slice, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            GhostableError::InvalidKey(format!(
                "environment key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(arr))
    }

    /// Access the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Hex SHA-256 of the raw key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }

    /// Derive the scoped key pair for `org/project/env`.
    pub fn derive_scoped_keys(&self, scope: &str) -> Result<ScopedKeys> {
        derive_scoped_keys(&self.bytes, scope)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for KeyMaterial {}
