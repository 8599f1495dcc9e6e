use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::SecretAad;

/// Integrity claims attached to a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Base64 HMAC-SHA256 of the plaintext under the scoped HMAC key.
    pub hmac: String,
    #[serde(default)]
    pub validators: Map<String, Value>,
}

/// One encrypted variable as stored by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSecret {
    pub env: String,
    pub name: String,
    pub ciphertext: String,
    pub nonce: String,
    pub alg: String,
    pub aad: SecretAad,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_kek_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_kek_fingerprint: Option<String>,
}

/// An upload before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSecretUploadRequest {
    #[serde(flatten)]
    pub secret: EnvironmentSecret,
    /// The server rejects the write unless the variable is at this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_version: Option<u64>,
}

/// An upload with the device's Ed25519 signature over the canonical JSON
/// of every other field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvironmentSecretUploadRequest {
    #[serde(flatten)]
    pub request: EnvironmentSecretUploadRequest,
    pub client_sig: String,
}

/// Secrets for an environment and every ancestor it inherits from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundle {
    pub env: String,
    /// Layer names, parent first.
    pub chain: Vec<String>,
    pub secrets: Vec<EnvironmentSecret>,
}

/// A variable that could not be recovered from a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretWarning {
    pub env: String,
    pub name: String,
    pub reason: String,
}

impl std::fmt::Display for SecretWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.env, self.name, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> EnvironmentSecret {
        EnvironmentSecret {
            env: "prod".into(),
            name: "DB_URL".into(),
            ciphertext: "Y3Q=".into(),
            nonce: "bm9uY2U=".into(),
            alg: "xchacha20-poly1305".into(),
            aad: SecretAad::new("acme", "api", "prod", "DB_URL"),
            claims: None,
            version: None,
            env_kek_version: Some(2),
            env_kek_fingerprint: Some("ff".into()),
        }
    }

    #[test]
    fn secret_uses_wire_field_names() {
        let value = serde_json::to_value(secret()).unwrap();
        assert_eq!(value["envKekVersion"], 2);
        assert_eq!(value["envKekFingerprint"], "ff");
        assert_eq!(value["aad"]["org"], "acme");
        assert!(value.get("claims").is_none());
        assert!(value.get("version").is_none());
    }

    #[test]
    fn signed_request_flattens_into_one_object() {
        let signed = SignedEnvironmentSecretUploadRequest {
            request: EnvironmentSecretUploadRequest {
                secret: secret(),
                if_version: Some(4),
            },
            client_sig: "c2ln".into(),
        };
        let value = serde_json::to_value(&signed).unwrap();
        assert_eq!(value["if_version"], 4);
        assert_eq!(value["client_sig"], "c2ln");
        assert_eq!(value["name"], "DB_URL");

        let back: SignedEnvironmentSecretUploadRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back, signed);
    }

    #[test]
    fn claims_validators_default_to_empty() {
        let claims: Claims = serde_json::from_str(r#"{"hmac":"AA=="}"#).unwrap();
        assert!(claims.validators.is_empty());
    }
}
