//! Secret values: wire types, the per-variable codec, and the pull/push
//! flows that tie them to environment keys.

pub mod codec;
pub mod types;

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::info;

use crate::crypto::keys::KeyMaterial;
use crate::crypto::SecretAad;
use crate::envkey::EnvironmentKeyService;
use crate::errors::Result;
use crate::identity::DeviceIdentity;
use crate::token::DeploymentTokenIdentity;

pub use codec::{
    build_upload, canonical_upload_bytes, decrypt_bundle, decrypt_secret, encrypt_secret,
    reencrypt, sign_upload, verify_upload, DecryptedBundle, SecretTarget,
};
pub use types::{
    Claims, EnvironmentSecret, EnvironmentSecretUploadRequest, SecretBundle, SecretWarning,
    SignedEnvironmentSecretUploadRequest,
};

/// Organization and project a pull or push acts on.
#[derive(Debug, Clone, Copy)]
pub struct ProjectScope<'s> {
    pub org: &'s str,
    pub project_id: &'s str,
}

/// Fetch and decrypt `env` with its inherited layers as a device.
///
/// Failing to obtain any layer's key that has secrets is fatal; a
/// single undecryptable variable is a warning.
pub fn pull_environment(
    service: &EnvironmentKeyService<'_>,
    scope: ProjectScope<'_>,
    env: &str,
    identity: &DeviceIdentity,
) -> Result<DecryptedBundle> {
    pull_with(service, scope, env, |layer| {
        service
            .ensure_environment_key(scope.project_id, layer, identity)
            .map(|k| k.key)
    })
}

/// Fetch and decrypt `env` with its inherited layers as a deployment token.
pub fn pull_environment_for_token(
    service: &EnvironmentKeyService<'_>,
    scope: ProjectScope<'_>,
    env: &str,
    token: &DeploymentTokenIdentity,
) -> Result<DecryptedBundle> {
    pull_with(service, scope, env, |layer| {
        service
            .load_environment_key_for_token(scope.project_id, layer, token)
            .map(|k| k.key)
    })
}

fn pull_with(
    service: &EnvironmentKeyService<'_>,
    scope: ProjectScope<'_>,
    env: &str,
    mut key_for: impl FnMut(&str) -> Result<KeyMaterial>,
) -> Result<DecryptedBundle> {
    let bundle = service.server().pull_secrets(scope.project_id, env)?;

    let mut keys = HashMap::new();
    for layer in &bundle.chain {
        if bundle.secrets.iter().any(|s| &s.env == layer) {
            keys.insert(layer.clone(), key_for(layer.as_str())?);
        }
    }

    let decrypted = decrypt_bundle(scope.org, scope.project_id, &bundle, &keys);
    info!(
        project = scope.project_id,
        env,
        layers = bundle.chain.len(),
        values = decrypted.values.len(),
        warnings = decrypted.warnings.len(),
        "pulled environment"
    );
    Ok(decrypted)
}

/// Optional guards and metadata for a push.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Only write if the variable is currently at this version.
    pub if_version: Option<u64>,
    pub validators: Map<String, Value>,
}

/// Encrypt, sign and upload one value.
///
/// Publishes the environment key first if this is its first use.  A
/// stale `if_version` surfaces as `ConcurrencyConflict`.
pub fn push_secret(
    service: &EnvironmentKeyService<'_>,
    scope: ProjectScope<'_>,
    env: &str,
    name: &str,
    value: &str,
    identity: &DeviceIdentity,
    options: PushOptions,
) -> Result<EnvironmentSecret> {
    let ensured = service.ensure_environment_key(scope.project_id, env, identity)?;
    if ensured.created {
        service.publish_key_envelopes(
            scope.project_id,
            env,
            identity,
            &ensured.key,
            ensured.version,
        )?;
    }

    let target = SecretTarget {
        aad: SecretAad::new(scope.org, scope.project_id, env, name),
        key: &ensured.key,
        key_version: ensured.version,
    };
    let upload = build_upload(identity, &target, value, options.if_version, options.validators)?;
    service
        .server()
        .push_secret(scope.project_id, &identity.device_id, &upload)
}
