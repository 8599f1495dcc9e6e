//! The key server as seen from the client.
//!
//! The server stores ciphertext, envelopes and membership and is the
//! single source of truth for the current environment key version.  It
//! never sees plaintext.  `KeyServer` lists exactly the requests the
//! client issues; an HTTP transport would implement it, and
//! `MemoryKeyServer` implements it in-process.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, EnvironmentKey, Recipient};
use crate::errors::Result;
use crate::identity::{decode_public_key, DeviceIdentity};
use crate::secrets::{EnvironmentSecret, SecretBundle, SignedEnvironmentSecretUploadRequest};
use crate::token::DeploymentToken;

pub use memory::MemoryKeyServer;

/// Body of an environment key publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishKeyRequest {
    pub version: u64,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_device_id: Option<String>,
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Revoked,
}

/// A device registered with a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    /// X25519 public key, base64.
    pub public_key: String,
    /// Ed25519 public key, base64.  Used to check upload signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_public_key: Option<String>,
    pub status: DeviceStatus,
}

impl DeviceRecord {
    /// Registration record for a local identity.
    pub fn from_identity(identity: &DeviceIdentity) -> Self {
        let summary = identity.summary();
        Self {
            id: summary.device_id,
            name: summary.name,
            public_key: summary.encryption_public_key,
            signing_public_key: Some(summary.signing_public_key),
            status: DeviceStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }

    pub fn recipient(&self) -> Result<Recipient> {
        let public_key = decode_public_key("publicKey", &self.public_key)?;
        Ok(Recipient::device(&self.id, public_key))
    }
}

/// Requests the client makes against the key server.
pub trait KeyServer {
    /// Current environment key record, or `None` if none was published.
    fn get_environment_key(&self, project_id: &str, env: &str) -> Result<Option<EnvironmentKey>>;

    /// Publish a key version and its envelope.
    ///
    /// Rejected with `ConcurrencyConflict` when `version` is older than
    /// the server's, or equal to it with a different fingerprint.
    fn publish_environment_key(
        &self,
        project_id: &str,
        env: &str,
        request: &PublishKeyRequest,
    ) -> Result<EnvironmentKey>;

    fn list_devices(&self, project_id: &str) -> Result<Vec<DeviceRecord>>;

    fn list_deployment_tokens(&self, project_id: &str) -> Result<Vec<DeploymentToken>>;

    /// Secrets for `env` and its ancestors.
    fn pull_secrets(&self, project_id: &str, env: &str) -> Result<SecretBundle>;

    /// Store one signed secret.  A stale `if_version` is a
    /// `ConcurrencyConflict`.
    fn push_secret(
        &self,
        project_id: &str,
        device_id: &str,
        upload: &SignedEnvironmentSecretUploadRequest,
    ) -> Result<EnvironmentSecret>;
}
