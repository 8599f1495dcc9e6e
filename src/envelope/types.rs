//! Wire shapes for environment keys and their envelopes.
//!
//! These mirror the server resource byte-for-byte: camelCase field
//! names, base64 byte fields, and `type: "device" | "deployment"` on
//! recipients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RecipientType, WrappedKey};
use crate::crypto::{b64_decode, b64_encode};
use crate::errors::{GhostableError, Result};

/// One recipient's entry inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeRecipient {
    #[serde(rename = "type")]
    pub recipient_type: RecipientType,
    pub id: String,
    /// Base64 of the JSON-encoded `WrappedKey` for this recipient.
    pub edek_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
}

impl EnvelopeRecipient {
    pub(crate) fn new(recipient_type: RecipientType, id: &str, wrapped: &WrappedKey) -> Result<Self> {
        let json = serde_json::to_vec(wrapped)
            .map_err(|e| GhostableError::SerializationError(format!("edek: {e}")))?;
        Ok(Self {
            recipient_type,
            id: id.to_string(),
            edek_b64: b64_encode(&json),
            seen_at: None,
        })
    }

    /// Decode this recipient's wrapped key.
    pub fn wrapped_key(&self) -> Result<WrappedKey> {
        let json = b64_decode("edekB64", &self.edek_b64)?;
        serde_json::from_slice(&json).map_err(|e| {
            GhostableError::InvalidEnvelope(format!("edek for '{}' is not a wrapped key: {e}", self.id))
        })
    }
}

/// A key wrapped for a set of recipients.
///
/// The top-level ciphertext, nonce and ephemeral key are the publishing
/// device's own wrap; `recipients` holds one independent wrap each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Assigned by the server; empty until published.
    #[serde(default)]
    pub id: String,
    pub ciphertext_b64: String,
    pub nonce_b64: String,
    pub alg: String,
    pub from_ephemeral_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recipients: Vec<EnvelopeRecipient>,
}

impl Envelope {
    /// Find the entry for a recipient by type and id.
    pub fn recipient(&self, recipient_type: RecipientType, id: &str) -> Option<&EnvelopeRecipient> {
        self.recipients
            .iter()
            .find(|r| r.recipient_type == recipient_type && r.id == id)
    }

    /// Ids of all recipients of a given type.
    pub fn recipient_ids(&self, recipient_type: RecipientType) -> Vec<&str> {
        self.recipients
            .iter()
            .filter(|r| r.recipient_type == recipient_type)
            .map(|r| r.id.as_str())
            .collect()
    }
}

/// The server's record of one environment key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentKey {
    pub id: String,
    pub version: u64,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_device_id: Option<String>,
    pub envelope: Envelope,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_JSON: &str = r#"{
        "id": "kek_1",
        "version": 3,
        "fingerprint": "ab12",
        "createdAt": "2026-01-02T03:04:05Z",
        "createdByDeviceId": "dev_1",
        "envelope": {
            "id": "envl_9",
            "ciphertextB64": "AA==",
            "nonceB64": "AQ==",
            "alg": "XChaCha20-Poly1305+HKDF-SHA256",
            "fromEphemeralPublicKey": "Ag==",
            "recipients": [
                { "type": "device", "id": "dev_1", "edekB64": "e30=" },
                { "type": "deployment", "id": "tok_1", "edekB64": "e30=", "seenAt": "2026-01-03T00:00:00Z" }
            ]
        }
    }"#;

    #[test]
    fn parses_server_record() {
        let key: EnvironmentKey = serde_json::from_str(SERVER_JSON).unwrap();
        assert_eq!(key.version, 3);
        assert_eq!(key.created_by_device_id.as_deref(), Some("dev_1"));
        assert!(key.rotated_at.is_none());
        assert_eq!(key.envelope.recipients.len(), 2);
        assert_eq!(
            key.envelope.recipients[1].recipient_type,
            RecipientType::Deployment
        );
        assert!(key.envelope.recipients[1].seen_at.is_some());
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let key: EnvironmentKey = serde_json::from_str(SERVER_JSON).unwrap();
        let value = serde_json::to_value(&key).unwrap();
        let recipient = &value["envelope"]["recipients"][0];
        assert_eq!(recipient["type"], "device");
        assert_eq!(recipient["edekB64"], "e30=");
        assert!(recipient.get("seenAt").is_none());
        assert_eq!(value["envelope"]["fromEphemeralPublicKey"], "Ag==");
        assert!(value.get("rotatedAt").is_none());
    }

    #[test]
    fn finds_recipients_by_type_and_id() {
        let key: EnvironmentKey = serde_json::from_str(SERVER_JSON).unwrap();
        assert!(key.envelope.recipient(RecipientType::Device, "dev_1").is_some());
        assert!(key.envelope.recipient(RecipientType::Deployment, "dev_1").is_none());
        assert_eq!(key.envelope.recipient_ids(RecipientType::Deployment), vec!["tok_1"]);
    }

    #[test]
    fn malformed_edek_is_reported() {
        let key: EnvironmentKey = serde_json::from_str(SERVER_JSON).unwrap();
        // "e30=" is "{}", which lacks the wrapped-key fields.
        let err = key.envelope.recipients[0].wrapped_key().unwrap_err();
        assert!(matches!(err, GhostableError::InvalidEnvelope(_)));
    }
}
