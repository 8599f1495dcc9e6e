//! XChaCha20-Poly1305 authenticated encryption.
//!
//! Each call to `seal` generates a fresh random 24-byte nonce.  Unlike a
//! nonce-prefixed blob, the nonce is returned separately because the
//! server stores `nonce` and `ciphertext` as distinct fields.
//!
//! Associated data is authenticated but not encrypted.  For secret
//! values it is the canonical encoding of [`SecretAad`], which ties a
//! ciphertext to its organization, project, environment and variable
//! name.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};

use super::keys::random_array;
use crate::errors::{GhostableError, Result};

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_LEN: usize = 24;

/// Wire identifier of the symmetric cipher used for secret values.
pub const SECRET_ALGORITHM: &str = "xchacha20-poly1305";

/// Nonce and ciphertext (with the 16-byte Poly1305 tag appended).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Context bound into every secret ciphertext.
///
/// Field order is fixed (`org`, `project`, `env`, `name`) so two equal
/// values always produce identical bound bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretAad {
    pub org: String,
    pub project: String,
    pub env: String,
    pub name: String,
}

impl SecretAad {
    pub fn new(org: &str, project: &str, env: &str, name: &str) -> Self {
        Self {
            org: org.to_string(),
            project: project.to_string(),
            env: env.to_string(),
            name: name.to_string(),
        }
    }

    /// Canonical bytes bound into the AEAD tag.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| GhostableError::SerializationError(format!("aad: {e}")))
    }

    /// The derivation scope this AAD belongs to: `org/project/env`.
    pub fn scope(&self) -> String {
        format!("{}/{}/{}", self.org, self.project, self.env)
    }
}

/// Encrypt `plaintext` under a 32-byte `key`, authenticating `aad`.
pub fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<SealedBox> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| GhostableError::EncryptionFailed(format!("invalid key length: {e}")))?;

    let nonce: [u8; NONCE_LEN] = random_array();

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| GhostableError::EncryptionFailed(format!("encryption error: {e}")))?;

    Ok(SealedBox { nonce, ciphertext })
}

/// Decrypt a ciphertext produced by `seal`.
///
/// Fails closed: any mismatch in key, nonce, ciphertext or `aad` yields
/// `DecryptionFailed` and no plaintext.
pub fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(GhostableError::DecryptionFailed);
    }

    let cipher =
        XChaCha20Poly1305::new_from_slice(key).map_err(|_| GhostableError::DecryptionFailed)?;

    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| GhostableError::DecryptionFailed)
}

/// Seal a secret value bound to its canonical AAD.
pub fn aead_seal(key: &[u8], plaintext: &[u8], aad: &SecretAad) -> Result<SealedBox> {
    seal(key, plaintext, &aad.canonical_bytes()?)
}

/// Open a secret value, re-binding the canonical AAD.
pub fn aead_open(key: &[u8], sealed: &SealedBox, aad: &SecretAad) -> Result<Vec<u8>> {
    open(key, &sealed.nonce, &sealed.ciphertext, &aad.canonical_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KEY_LEN;

    fn aad() -> SecretAad {
        SecretAad::new("acme", "billing", "prod", "DATABASE_URL")
    }

    #[test]
    fn canonical_bytes_follow_fixed_field_order() {
        let bytes = aad().canonical_bytes().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"org":"acme","project":"billing","env":"prod","name":"DATABASE_URL"}"#
        );
    }

    #[test]
    fn equal_aad_values_bind_identically() {
        let a = aad();
        let b: SecretAad = serde_json::from_str(
            r#"{"name":"DATABASE_URL","env":"prod","project":"billing","org":"acme"}"#,
        )
        .unwrap();
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn scope_is_org_project_env() {
        assert_eq!(aad().scope(), "acme/billing/prod");
    }

    #[test]
    fn seal_uses_fresh_nonces() {
        let key = [7u8; KEY_LEN];
        let a = seal(&key, b"same", b"").unwrap();
        let b = seal(&key, b"same", b"").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn open_rejects_short_nonce() {
        let key = [7u8; KEY_LEN];
        let sealed = seal(&key, b"value", b"").unwrap();
        let result = open(&key, &sealed.nonce[..12], &sealed.ciphertext, b"");
        assert!(matches!(result, Err(GhostableError::DecryptionFailed)));
    }

    #[test]
    fn seal_rejects_wrong_key_length() {
        assert!(seal(&[0u8; 16], b"value", b"").is_err());
    }
}
