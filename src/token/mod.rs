//! Deployment tokens: unattended recipients such as CI runners.
//!
//! A token is an X25519 keypair whose private half is a 32-byte seed
//! held outside the key store (typically an environment variable on the
//! runner).  For envelope purposes a token is indistinguishable from a
//! device.

use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::crypto::keys::{fingerprint, fingerprints_match, random_array};
use crate::crypto::signing::{agreement_public_key, parse_agreement_secret, PRIVATE_KEY_SIZE};
use crate::crypto::{b64_decode, b64_encode};
use crate::envelope::{KeyHolder, Recipient, RecipientType};
use crate::errors::{GhostableError, Result};
use crate::identity::decode_public_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Revoked,
}

/// The server's record of a deployment token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentToken {
    pub id: String,
    pub public_key: String,
    pub status: TokenStatus,
    pub fingerprint: String,
}

impl DeploymentToken {
    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active
    }

    /// The token as an envelope recipient.
    ///
    /// Fails if the recorded fingerprint does not belong to `public_key`.
    pub fn recipient(&self) -> Result<Recipient> {
        let public_key = decode_public_key("publicKey", &self.public_key)?;
        if !fingerprints_match(&fingerprint(&public_key), &self.fingerprint) {
            return Err(GhostableError::InvalidKey(format!(
                "fingerprint of deployment token '{}' does not match its public key",
                self.id
            )));
        }
        Ok(Recipient::deployment_token(&self.id, public_key))
    }
}

/// A deployment token with its private seed loaded.
pub struct DeploymentTokenIdentity {
    id: String,
    secret: StaticSecret,
}

impl DeploymentTokenIdentity {
    pub fn from_seed(id: &str, seed: &[u8]) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            secret: parse_agreement_secret(seed)?,
        })
    }

    /// Load from the base64 seed printed by `token keygen`.
    pub fn from_seed_b64(id: &str, seed_b64: &str) -> Result<Self> {
        let seed = Zeroizing::new(b64_decode("token seed", seed_b64.trim())?);
        Self::from_seed(id, &seed)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> [u8; 32] {
        agreement_public_key(&self.secret).to_bytes()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key())
    }

    pub fn recipient(&self) -> Recipient {
        Recipient::deployment_token(&self.id, self.public_key())
    }
}

impl KeyHolder for DeploymentTokenIdentity {
    fn recipient_id(&self) -> &str {
        &self.id
    }

    fn recipient_type(&self) -> RecipientType {
        RecipientType::Deployment
    }

    fn agreement_secret(&self) -> &StaticSecret {
        &self.secret
    }
}

/// Freshly generated token key material, ready to register and hand out.
pub struct GeneratedTokenKeys {
    /// Base64 seed.  Shown once; never stored by this crate.
    pub seed_b64: Zeroizing<String>,
    pub public_key_b64: String,
    pub fingerprint: String,
}

/// Generate a new token keypair.
pub fn generate_token_keys() -> GeneratedTokenKeys {
    let seed = Zeroizing::new(random_array::<PRIVATE_KEY_SIZE>());
    let public_key = agreement_public_key(&StaticSecret::from(*seed)).to_bytes();

    GeneratedTokenKeys {
        seed_b64: Zeroizing::new(b64_encode(&seed[..])),
        public_key_b64: b64_encode(&public_key),
        fingerprint: fingerprint(&public_key),
    }
}
