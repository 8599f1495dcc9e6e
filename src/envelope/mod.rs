//! Envelope protocol: wrapping one environment key for many recipients.
//!
//! To wrap a 32-byte key `K` for a recipient with X25519 public key `P`:
//! 1. **Ephemeral keypair**: generate a fresh `(e_priv, e_pub)`.
//! 2. **Agreement**: `S = X25519(e_priv, P)`; all-zero (non-contributory)
//!    results are rejected.
//! 3. **Derive**: `W = HKDF-SHA256(S, info = "ghostable/envelope/v1")`.
//! 4. **Seal**: XChaCha20-Poly1305 over `K` under `W`, with AAD bound to
//!    `{project_id, environment, key_fingerprint}` so a wrap for one
//!    environment cannot be replayed as another.
//!
//! The recipient recomputes `S = X25519(recipient_priv, e_pub)`,
//! re-derives `W` and opens.  Every recipient gets an independent wrap of
//! the same `K`, so membership changes only re-wrap the key and never
//! touch secret ciphertexts.

pub mod types;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::crypto::encryption;
use crate::crypto::keys::{fingerprints_match, hkdf_expand, random_array, KeyMaterial};
use crate::crypto::signing::agreement_public_key;
use crate::crypto::{b64_decode, b64_encode};
use crate::errors::{GhostableError, Result};

pub use types::{Envelope, EnvelopeRecipient, EnvironmentKey};

/// Wire identifier of the envelope wrapping scheme.
pub const ENVELOPE_ALGORITHM: &str = "XChaCha20-Poly1305+HKDF-SHA256";

/// HKDF info string separating envelope wrapping keys from every other use.
const WRAP_INFO: &[u8] = b"ghostable/envelope/v1";

/// Recipient kind as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    Device,
    Deployment,
}

impl std::fmt::Display for RecipientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientType::Device => f.write_str("device"),
            RecipientType::Deployment => f.write_str("deployment"),
        }
    }
}

/// Someone an environment key can be wrapped for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Device { id: String, public_key: [u8; 32] },
    DeploymentToken { id: String, public_key: [u8; 32] },
}

impl Recipient {
    pub fn device(id: &str, public_key: [u8; 32]) -> Self {
        Recipient::Device {
            id: id.to_string(),
            public_key,
        }
    }

    pub fn deployment_token(id: &str, public_key: [u8; 32]) -> Self {
        Recipient::DeploymentToken {
            id: id.to_string(),
            public_key,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Recipient::Device { id, .. } | Recipient::DeploymentToken { id, .. } => id,
        }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        match self {
            Recipient::Device { public_key, .. }
            | Recipient::DeploymentToken { public_key, .. } => public_key,
        }
    }

    pub fn recipient_type(&self) -> RecipientType {
        match self {
            Recipient::Device { .. } => RecipientType::Device,
            Recipient::DeploymentToken { .. } => RecipientType::Deployment,
        }
    }

    fn same_as(&self, other: &Recipient) -> bool {
        self.recipient_type() == other.recipient_type() && self.id() == other.id()
    }
}

/// Anything holding an X25519 private key that may appear as a recipient.
pub trait KeyHolder {
    fn recipient_id(&self) -> &str;
    fn recipient_type(&self) -> RecipientType;
    fn agreement_secret(&self) -> &StaticSecret;

    /// Human-readable label for errors (`device dev_…`).
    fn describe(&self) -> String {
        format!("{} '{}'", self.recipient_type(), self.recipient_id())
    }
}

/// Context bound into every wrap as associated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapContext {
    pub project_id: String,
    pub environment: String,
    pub key_fingerprint: String,
}

impl WrapContext {
    pub fn new(project_id: &str, environment: &str, key_fingerprint: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            environment: environment.to_string(),
            key_fingerprint: key_fingerprint.to_string(),
        }
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| GhostableError::SerializationError(format!("wrap context: {e}")))
    }
}

/// A key sealed for exactly one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    pub alg: String,
    pub from_ephemeral_public_key: String,
    pub nonce_b64: String,
    pub ciphertext_b64: String,
}

/// Wrap `key` for the holder of `recipient_public_key`.
pub fn wrap_key(
    key: &KeyMaterial,
    recipient_public_key: &[u8; 32],
    context: &WrapContext,
) -> Result<WrappedKey> {
    let ephemeral_secret = StaticSecret::from(random_array::<32>());
    let ephemeral_public = agreement_public_key(&ephemeral_secret);

    let recipient = X25519PublicKey::from(*recipient_public_key);
    let shared = ephemeral_secret.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(GhostableError::InvalidKey(
            "recipient public key is a low-order point".into(),
        ));
    }

    let wrapping_key = hkdf_expand(shared.as_bytes(), WRAP_INFO)?;
    let sealed = encryption::seal(
        &wrapping_key[..],
        key.as_bytes(),
        &context.canonical_bytes()?,
    )?;

    Ok(WrappedKey {
        alg: ENVELOPE_ALGORITHM.to_string(),
        from_ephemeral_public_key: b64_encode(ephemeral_public.as_bytes()),
        nonce_b64: b64_encode(&sealed.nonce),
        ciphertext_b64: b64_encode(&sealed.ciphertext),
    })
}

/// Recover a key wrapped by `wrap_key`.
///
/// Fails closed with `DecryptionFailed` if the private key, ephemeral
/// key, nonce, ciphertext or context do not all match.
pub fn unwrap_key(
    recipient_secret: &StaticSecret,
    wrapped: &WrappedKey,
    context: &WrapContext,
) -> Result<KeyMaterial> {
    if wrapped.alg != ENVELOPE_ALGORITHM {
        return Err(GhostableError::InvalidEnvelope(format!(
            "unsupported envelope algorithm '{}'",
            wrapped.alg
        )));
    }

    let ephemeral_bytes = b64_decode("fromEphemeralPublicKey", &wrapped.from_ephemeral_public_key)?;
    let ephemeral: [u8; 32] = ephemeral_bytes.as_slice().try_into().map_err(|_| {
        GhostableError::InvalidEnvelope("ephemeral public key must be 32 bytes".into())
    })?;
    let nonce = b64_decode("nonceB64", &wrapped.nonce_b64)?;
    let ciphertext = b64_decode("ciphertextB64", &wrapped.ciphertext_b64)?;

    let shared = recipient_secret.diffie_hellman(&X25519PublicKey::from(ephemeral));
    if !shared.was_contributory() {
        return Err(GhostableError::DecryptionFailed);
    }

    let wrapping_key = hkdf_expand(shared.as_bytes(), WRAP_INFO)?;
    let plaintext = zeroize::Zeroizing::new(encryption::open(
        &wrapping_key[..],
        &nonce,
        &ciphertext,
        &context.canonical_bytes()?,
    )?);

    KeyMaterial::from_slice(&plaintext).map_err(|_| GhostableError::DecryptionFailed)
}

/// Unwrap the entry addressed to `holder` from a server envelope.
///
/// A missing entry is `UnauthorizedRecipient`; the recovered key must
/// match the context fingerprint.
pub fn open_envelope(
    envelope: &Envelope,
    holder: &dyn KeyHolder,
    context: &WrapContext,
) -> Result<KeyMaterial> {
    let entry = envelope
        .recipient(holder.recipient_type(), holder.recipient_id())
        .ok_or_else(|| GhostableError::UnauthorizedRecipient {
            project: context.project_id.clone(),
            environment: context.environment.clone(),
            recipient: holder.describe(),
        })?;

    let key = unwrap_key(holder.agreement_secret(), &entry.wrapped_key()?, context)?;
    if !fingerprints_match(&key.fingerprint(), &context.key_fingerprint) {
        return Err(GhostableError::DecryptionFailed);
    }
    Ok(key)
}

/// A recipient that could not be wrapped for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientWarning {
    pub recipient_type: RecipientType,
    pub recipient_id: String,
    pub reason: String,
}

/// Result of fanning a key out to a recipient set.
#[derive(Debug)]
pub struct FanOut {
    pub envelope: Envelope,
    pub warnings: Vec<RecipientWarning>,
}

/// Wrap `key` once per recipient and assemble an envelope.
///
/// `publisher` is always included and its wrap fills the envelope's
/// top-level fields.  Duplicate recipients are wrapped once.  A failure
/// for any other recipient becomes a warning; a failure for the
/// publisher is an error.
pub fn build_envelope(
    key: &KeyMaterial,
    context: &WrapContext,
    publisher: &Recipient,
    recipients: &[Recipient],
) -> Result<FanOut> {
    let own = wrap_key(key, publisher.public_key(), context)?;

    let mut entries = vec![EnvelopeRecipient::new(
        publisher.recipient_type(),
        publisher.id(),
        &own,
    )?];
    let mut seen = vec![publisher.clone()];
    let mut warnings = Vec::new();

    for recipient in recipients {
        if seen.iter().any(|s| s.same_as(recipient)) {
            continue;
        }
        seen.push(recipient.clone());

        match wrap_key(key, recipient.public_key(), context)
            .and_then(|w| EnvelopeRecipient::new(recipient.recipient_type(), recipient.id(), &w))
        {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(
                    recipient = %recipient.id(),
                    kind = %recipient.recipient_type(),
                    error = %e,
                    "skipping recipient"
                );
                warnings.push(RecipientWarning {
                    recipient_type: recipient.recipient_type(),
                    recipient_id: recipient.id().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    debug!(recipients = entries.len(), skipped = warnings.len(), "built envelope");

    Ok(FanOut {
        envelope: Envelope {
            id: String::new(),
            ciphertext_b64: own.ciphertext_b64,
            nonce_b64: own.nonce_b64,
            alg: own.alg,
            from_ephemeral_public_key: own.from_ephemeral_public_key,
            created_at: None,
            updated_at: None,
            revoked_at: None,
            recipients: entries,
        },
        warnings,
    })
}
