//! Cryptographic primitives for Ghostable.
//!
//! This module provides:
//! - XChaCha20-Poly1305 encryption bound to canonical AAD (`encryption`)
//! - HKDF scoped derivation, HMAC, fingerprints and key material (`keys`)
//! - Ed25519 signing and X25519 agreement keys (`signing`)
//! - Base64 helpers for wire fields (`encoding`)
//!
//! Everything here is a pure function over byte buffers. No I/O.

pub mod encoding;
pub mod encryption;
pub mod keys;
pub mod signing;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{aead_seal, derive_scoped_keys, fingerprint, ...};
pub use encoding::{b64_decode, b64_encode};
pub use encryption::{aead_open, aead_seal, SealedBox, SecretAad, SECRET_ALGORITHM};
pub use keys::{
    derive_scoped_keys, fingerprint, hmac_sha256, random_bytes, KeyMaterial, ScopedKeys,
};
pub use signing::{sign, verify};
