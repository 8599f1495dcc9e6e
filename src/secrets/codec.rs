//! Per-variable encryption, signing and bundle decryption.
//!
//! A secret value is sealed under the encryption key derived for its
//! `org/project/env` scope, with AAD `{org, project, env, name}`.  An
//! HMAC of the plaintext under the scoped HMAC key travels in `claims`
//! so values can be compared without decrypting.  Uploads are signed
//! with the device's Ed25519 key over the canonical JSON of the request.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::types::{
    Claims, EnvironmentSecret, EnvironmentSecretUploadRequest, SecretBundle, SecretWarning,
    SignedEnvironmentSecretUploadRequest,
};
use crate::crypto::encryption::{aead_open, aead_seal, SealedBox, NONCE_LEN, SECRET_ALGORITHM};
use crate::crypto::keys::{hmac_sha256, verify_hmac_sha256, KeyMaterial};
use crate::crypto::signing;
use crate::crypto::{b64_decode, b64_encode, SecretAad};
use crate::errors::{GhostableError, Result};
use crate::identity::DeviceIdentity;

/// Where a secret lives and which environment key version seals it.
#[derive(Debug, Clone)]
pub struct SecretTarget<'k> {
    pub aad: SecretAad,
    pub key: &'k KeyMaterial,
    pub key_version: u64,
}

/// Seal a value into an unsigned secret record.
pub fn encrypt_secret(
    target: &SecretTarget<'_>,
    value: &str,
    validators: Map<String, Value>,
) -> Result<EnvironmentSecret> {
    let scoped = target.key.derive_scoped_keys(&target.aad.scope())?;
    let sealed = aead_seal(&scoped.enc_key, value.as_bytes(), &target.aad)?;
    let hmac = hmac_sha256(&scoped.hmac_key, value.as_bytes())?;

    Ok(EnvironmentSecret {
        env: target.aad.env.clone(),
        name: target.aad.name.clone(),
        ciphertext: b64_encode(&sealed.ciphertext),
        nonce: b64_encode(&sealed.nonce),
        alg: SECRET_ALGORITHM.to_string(),
        aad: target.aad.clone(),
        claims: Some(Claims {
            hmac: b64_encode(&hmac),
            validators,
        }),
        version: None,
        env_kek_version: Some(target.key_version),
        env_kek_fingerprint: Some(target.key.fingerprint()),
    })
}

/// Decrypt one secret sealed for `expected`.
///
/// Fails closed: the stored AAD must equal `expected`, the ciphertext
/// must authenticate, and a present HMAC claim must match the plaintext.
pub fn decrypt_secret(
    key: &KeyMaterial,
    secret: &EnvironmentSecret,
    expected: &SecretAad,
) -> Result<Zeroizing<String>> {
    if secret.alg != SECRET_ALGORITHM {
        return Err(GhostableError::InvalidEnvelope(format!(
            "unsupported secret algorithm '{}'",
            secret.alg
        )));
    }
    if &secret.aad != expected {
        return Err(GhostableError::DecryptionFailed);
    }

    let nonce: [u8; NONCE_LEN] = b64_decode("nonce", &secret.nonce)?
        .as_slice()
        .try_into()
        .map_err(|_| GhostableError::DecryptionFailed)?;
    let sealed = SealedBox {
        nonce,
        ciphertext: b64_decode("ciphertext", &secret.ciphertext)?,
    };

    let scoped = key.derive_scoped_keys(&expected.scope())?;
    let plaintext = Zeroizing::new(aead_open(&scoped.enc_key, &sealed, expected)?);

    if let Some(claims) = &secret.claims {
        let tag = b64_decode("claims.hmac", &claims.hmac)?;
        if !verify_hmac_sha256(&scoped.hmac_key, &plaintext, &tag)? {
            return Err(GhostableError::DecryptionFailed);
        }
    }

    let text = String::from_utf8(plaintext.to_vec())
        .map_err(|_| GhostableError::SerializationError("secret value is not UTF-8".into()))?;
    Ok(Zeroizing::new(text))
}

/// Canonical bytes covered by `client_sig`.
///
/// Object keys are sorted, so the encoding does not depend on field
/// declaration order.
pub fn canonical_upload_bytes(request: &EnvironmentSecretUploadRequest) -> Result<Vec<u8>> {
    let value = serde_json::to_value(request)
        .map_err(|e| GhostableError::SerializationError(format!("upload: {e}")))?;
    serde_json::to_vec(&sorted(value))
        .map_err(|e| GhostableError::SerializationError(format!("upload: {e}")))
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Sign an upload with the device's Ed25519 key.
pub fn sign_upload(
    identity: &DeviceIdentity,
    request: EnvironmentSecretUploadRequest,
) -> Result<SignedEnvironmentSecretUploadRequest> {
    let signature = identity.sign(&canonical_upload_bytes(&request)?);
    Ok(SignedEnvironmentSecretUploadRequest {
        request,
        client_sig: b64_encode(&signature),
    })
}

/// Encrypt, claim and sign one value for upload.
pub fn build_upload(
    identity: &DeviceIdentity,
    target: &SecretTarget<'_>,
    value: &str,
    if_version: Option<u64>,
    validators: Map<String, Value>,
) -> Result<SignedEnvironmentSecretUploadRequest> {
    let secret = encrypt_secret(target, value, validators)?;
    sign_upload(identity, EnvironmentSecretUploadRequest { secret, if_version })
}

/// Check `client_sig` against a device's Ed25519 public key.
pub fn verify_upload(
    upload: &SignedEnvironmentSecretUploadRequest,
    signing_public_key: &[u8],
) -> Result<()> {
    let signature = b64_decode("client_sig", &upload.client_sig)?;
    let message = canonical_upload_bytes(&upload.request)?;
    if signing::verify(signing_public_key, &message, &signature) {
        Ok(())
    } else {
        Err(GhostableError::InvalidSignature)
    }
}

/// Re-seal a stored secret under a new environment key.
///
/// The result carries `if_version` set to the stored version so a
/// concurrent edit is detected rather than overwritten.
pub fn reencrypt(
    identity: &DeviceIdentity,
    secret: &EnvironmentSecret,
    old_key: &KeyMaterial,
    new_target: &SecretTarget<'_>,
) -> Result<SignedEnvironmentSecretUploadRequest> {
    let value = decrypt_secret(old_key, secret, &new_target.aad)?;
    let validators = secret
        .claims
        .as_ref()
        .map(|c| c.validators.clone())
        .unwrap_or_default();
    build_upload(identity, new_target, &value, secret.version, validators)
}

/// Values recovered from a bundle, with per-variable failures.
#[derive(Debug, Default)]
pub struct DecryptedBundle {
    pub values: BTreeMap<String, Zeroizing<String>>,
    pub warnings: Vec<SecretWarning>,
}

impl DecryptedBundle {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.as_str())
    }
}

/// Decrypt every secret in a bundle and merge the chain.
///
/// `keys` maps layer name to its environment key.  Layers are applied
/// parent first, so a child's value replaces its parent's.  A variable
/// that fails for any reason is skipped and reported as a warning.
pub fn decrypt_bundle(
    org: &str,
    project: &str,
    bundle: &SecretBundle,
    keys: &HashMap<String, KeyMaterial>,
) -> DecryptedBundle {
    let mut out = DecryptedBundle::default();

    for secret in &bundle.secrets {
        if !bundle.chain.contains(&secret.env) {
            out.warnings.push(SecretWarning {
                env: secret.env.clone(),
                name: secret.name.clone(),
                reason: "environment is not part of the inheritance chain".into(),
            });
        }
    }

    for layer in &bundle.chain {
        for secret in bundle.secrets.iter().filter(|s| &s.env == layer) {
            let result = match keys.get(layer) {
                Some(key) => decrypt_secret(
                    key,
                    secret,
                    &SecretAad::new(org, project, layer, &secret.name),
                ),
                None => Err(GhostableError::NoEnvironmentKey {
                    project: project.to_string(),
                    environment: layer.clone(),
                }),
            };

            match result {
                Ok(value) => {
                    if out.values.insert(secret.name.clone(), value).is_some() {
                        debug!(name = %secret.name, layer = %layer, "value overridden by child layer");
                    }
                }
                Err(e) => {
                    warn!(name = %secret.name, layer = %layer, error = %e, "skipping secret");
                    out.warnings.push(SecretWarning {
                        env: layer.clone(),
                        name: secret.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{EncryptionKeyPolicy, IdentityManager};
    use crate::keystore::MemoryKeyStore;

    fn target<'k>(key: &'k KeyMaterial, name: &str) -> SecretTarget<'k> {
        SecretTarget {
            aad: SecretAad::new("acme", "api", "prod", name),
            key,
            key_version: 1,
        }
    }

    #[test]
    fn encrypt_then_decrypt() {
        let key = KeyMaterial::generate();
        let t = target(&key, "DB_URL");
        let secret = encrypt_secret(&t, "postgres://x", Map::new()).unwrap();

        assert_eq!(secret.alg, "xchacha20-poly1305");
        assert_eq!(secret.env_kek_version, Some(1));
        assert_eq!(secret.env_kek_fingerprint, Some(key.fingerprint()));
        assert_eq!(
            decrypt_secret(&key, &secret, &t.aad).unwrap().as_str(),
            "postgres://x"
        );
    }

    #[test]
    fn decrypt_rejects_foreign_aad() {
        let key = KeyMaterial::generate();
        let secret = encrypt_secret(&target(&key, "A"), "v", Map::new()).unwrap();
        let other = SecretAad::new("acme", "api", "prod", "B");
        assert!(matches!(
            decrypt_secret(&key, &secret, &other),
            Err(GhostableError::DecryptionFailed)
        ));
    }

    #[test]
    fn decrypt_rejects_mismatched_claim() {
        let key = KeyMaterial::generate();
        let t = target(&key, "A");
        let mut secret = encrypt_secret(&t, "one", Map::new()).unwrap();
        let other = encrypt_secret(&t, "two", Map::new()).unwrap();
        secret.claims = other.claims;

        assert!(matches!(
            decrypt_secret(&key, &secret, &t.aad),
            Err(GhostableError::DecryptionFailed)
        ));
    }

    #[test]
    fn same_value_gives_same_claim() {
        let key = KeyMaterial::generate();
        let t = target(&key, "A");
        let a = encrypt_secret(&t, "same", Map::new()).unwrap();
        let b = encrypt_secret(&t, "same", Map::new()).unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(a.claims.unwrap().hmac, b.claims.unwrap().hmac);
    }

    #[test]
    fn canonical_bytes_sort_keys() {
        let key = KeyMaterial::generate();
        let secret = encrypt_secret(&target(&key, "A"), "v", Map::new()).unwrap();
        let bytes = canonical_upload_bytes(&EnvironmentSecretUploadRequest {
            secret,
            if_version: Some(3),
        })
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();

        let aad_pos = text.find("\"aad\"").unwrap();
        let alg_pos = text.find("\"alg\"").unwrap();
        let if_pos = text.find("\"if_version\"").unwrap();
        let name_pos = text.find("\"name\"").unwrap();
        assert!(aad_pos < alg_pos && alg_pos < if_pos && if_pos < name_pos);
    }

    #[test]
    fn signed_upload_verifies_only_unmodified() {
        let store = MemoryKeyStore::new();
        let identity = IdentityManager::new(&store)
            .create("laptop", None, EncryptionKeyPolicy::Independent)
            .unwrap();
        let key = KeyMaterial::generate();

        let mut upload = build_upload(&identity, &target(&key, "A"), "v", None, Map::new()).unwrap();
        let public = identity.signing_key.public_key();
        verify_upload(&upload, &public).unwrap();

        upload.request.if_version = Some(7);
        assert!(matches!(
            verify_upload(&upload, &public),
            Err(GhostableError::InvalidSignature)
        ));
    }

    #[test]
    fn reencrypt_moves_value_to_new_key() {
        let store = MemoryKeyStore::new();
        let identity = IdentityManager::new(&store)
            .create("laptop", None, EncryptionKeyPolicy::Independent)
            .unwrap();
        let old_key = KeyMaterial::generate();
        let new_key = KeyMaterial::generate();

        let mut stored = encrypt_secret(&target(&old_key, "A"), "v", Map::new()).unwrap();
        stored.version = Some(4);

        let mut new_target = target(&new_key, "A");
        new_target.key_version = 2;
        let upload = reencrypt(&identity, &stored, &old_key, &new_target).unwrap();

        assert_eq!(upload.request.if_version, Some(4));
        assert_eq!(upload.request.secret.env_kek_version, Some(2));
        assert_eq!(
            decrypt_secret(&new_key, &upload.request.secret, &new_target.aad)
                .unwrap()
                .as_str(),
            "v"
        );
        assert!(decrypt_secret(&old_key, &upload.request.secret, &new_target.aad).is_err());
    }

    #[test]
    fn bundle_reports_missing_layer_key() {
        let key = KeyMaterial::generate();
        let secret = encrypt_secret(&target(&key, "A"), "v", Map::new()).unwrap();
        let bundle = SecretBundle {
            env: "prod".into(),
            chain: vec!["prod".into()],
            secrets: vec![secret],
        };

        let out = decrypt_bundle("acme", "api", &bundle, &HashMap::new());
        assert!(out.values.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].name, "A");
    }

    #[test]
    fn bundle_flags_secrets_outside_chain() {
        let key = KeyMaterial::generate();
        let secret = encrypt_secret(&target(&key, "A"), "v", Map::new()).unwrap();
        let bundle = SecretBundle {
            env: "dev".into(),
            chain: vec!["dev".into()],
            secrets: vec![secret],
        };
        let keys = HashMap::from([("dev".to_string(), key.clone())]);

        let out = decrypt_bundle("acme", "api", &bundle, &keys);
        assert!(out.values.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].env, "prod");
    }
}
