//! Ed25519 signatures and X25519 key agreement.
//!
//! Device identities hold one keypair of each kind.  The X25519 key is
//! either generated independently or derived from the Ed25519 seed (the
//! clamped scalar of the signing key is used as the X25519 secret, so
//! the X25519 public key is the Montgomery form of the Ed25519 one).

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use super::keys::random_array;
use crate::errors::{GhostableError, Result};

/// Size of Ed25519 seeds and X25519 secrets in bytes.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Size of Ed25519 and X25519 public keys in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Wire identifier for the signing algorithm.
pub const SIGNING_ALGORITHM: &str = "Ed25519";

/// Wire identifier for the agreement algorithm.
pub const AGREEMENT_ALGORITHM: &str = "X25519";

/// Generate a fresh Ed25519 signing key from a random seed.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::from_bytes(&random_array())
}

/// Generate a fresh, independent X25519 secret.
pub fn generate_agreement_key() -> StaticSecret {
    StaticSecret::from(random_array::<PRIVATE_KEY_SIZE>())
}

/// Derive the X25519 secret that corresponds to an Ed25519 signing key.
pub fn agreement_key_from_signing_key(signing_key: &SigningKey) -> StaticSecret {
    StaticSecret::from(signing_key.to_scalar_bytes())
}

/// Public half of an X25519 secret.
pub fn agreement_public_key(secret: &StaticSecret) -> X25519PublicKey {
    X25519PublicKey::from(secret)
}

/// Parse a 32-byte X25519 public key.
pub fn parse_agreement_public_key(bytes: &[u8]) -> Result<X25519PublicKey> {
    let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
        GhostableError::InvalidKey(format!(
            "X25519 public key must be {PUBLIC_KEY_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(X25519PublicKey::from(arr))
}

/// Parse a 32-byte X25519 secret.
pub fn parse_agreement_secret(bytes: &[u8]) -> Result<StaticSecret> {
    let arr: [u8; PRIVATE_KEY_SIZE] = bytes.try_into().map_err(|_| {
        GhostableError::InvalidKey(format!(
            "X25519 private key must be {PRIVATE_KEY_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(StaticSecret::from(arr))
}

/// Parse a 32-byte Ed25519 seed.
pub fn parse_signing_key(bytes: &[u8]) -> Result<SigningKey> {
    let arr: [u8; PRIVATE_KEY_SIZE] = bytes.try_into().map_err(|_| {
        GhostableError::InvalidKey(format!(
            "Ed25519 seed must be {PRIVATE_KEY_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(SigningKey::from_bytes(&arr))
}

/// Parse a 32-byte Ed25519 verifying key.
pub fn parse_verifying_key(bytes: &[u8]) -> Result<VerifyingKey> {
    let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
        GhostableError::InvalidKey(format!(
            "Ed25519 public key must be {PUBLIC_KEY_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&arr)
        .map_err(|e| GhostableError::InvalidKey(format!("invalid Ed25519 public key: {e}")))
}

/// Sign `message` with an Ed25519 key, returning the 64-byte signature.
pub fn sign(signing_key: &SigningKey, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
    signing_key.sign(message).to_bytes()
}

/// Verify an Ed25519 signature.  Malformed keys or signatures verify as `false`.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(verifying_key) = parse_verifying_key(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify_strict(message, &signature).is_ok()
}
