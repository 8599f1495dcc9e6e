//! In-process `KeyServer` used by tests and local dry runs.
//!
//! Models the parts of the server the client relies on: the
//! authoritative environment key version, envelope storage, project
//! membership, environment inheritance and per-secret `if_version`
//! checks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;

use super::{DeviceRecord, DeviceStatus, KeyServer, PublishKeyRequest};
use crate::crypto::b64_decode;
use crate::envelope::EnvironmentKey;
use crate::errors::{GhostableError, Result};
use crate::secrets::{
    verify_upload, EnvironmentSecret, SecretBundle, SignedEnvironmentSecretUploadRequest,
};
use crate::token::{DeploymentToken, TokenStatus};

type EnvId = (String, String);

#[derive(Default)]
struct State {
    keys: HashMap<EnvId, EnvironmentKey>,
    parents: HashMap<EnvId, String>,
    devices: HashMap<String, Vec<DeviceRecord>>,
    tokens: HashMap<String, Vec<DeploymentToken>>,
    secrets: HashMap<EnvId, BTreeMap<String, EnvironmentSecret>>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    /// Layer names from the root ancestor down to `env`.
    fn chain(&self, project_id: &str, env: &str) -> Vec<String> {
        let mut chain = vec![env.to_string()];
        let mut seen = HashSet::from([env.to_string()]);
        let mut current = env.to_string();

        while let Some(parent) = self.parents.get(&(project_id.to_string(), current.clone())) {
            if !seen.insert(parent.clone()) {
                break;
            }
            chain.push(parent.clone());
            current = parent.clone();
        }

        chain.reverse();
        chain
    }
}

#[derive(Default)]
pub struct MemoryKeyServer {
    state: Mutex<State>,
}

impl MemoryKeyServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| GhostableError::Server("in-memory server lock poisoned".into()))
    }

    pub fn register_device(&self, project_id: &str, device: DeviceRecord) -> Result<()> {
        let mut state = self.state()?;
        let devices = state.devices.entry(project_id.to_string()).or_default();
        devices.retain(|d| d.id != device.id);
        devices.push(device);
        Ok(())
    }

    /// Mark a device revoked.  Returns `false` if it is unknown.
    pub fn revoke_device(&self, project_id: &str, device_id: &str) -> Result<bool> {
        let mut state = self.state()?;
        let Some(device) = state
            .devices
            .get_mut(project_id)
            .and_then(|ds| ds.iter_mut().find(|d| d.id == device_id))
        else {
            return Ok(false);
        };
        device.status = DeviceStatus::Revoked;
        Ok(true)
    }

    pub fn register_token(&self, project_id: &str, token: DeploymentToken) -> Result<()> {
        let mut state = self.state()?;
        let tokens = state.tokens.entry(project_id.to_string()).or_default();
        tokens.retain(|t| t.id != token.id);
        tokens.push(token);
        Ok(())
    }

    /// Mark a deployment token revoked.  Returns `false` if it is unknown.
    pub fn revoke_token(&self, project_id: &str, token_id: &str) -> Result<bool> {
        let mut state = self.state()?;
        let Some(token) = state
            .tokens
            .get_mut(project_id)
            .and_then(|ts| ts.iter_mut().find(|t| t.id == token_id))
        else {
            return Ok(false);
        };
        token.status = TokenStatus::Revoked;
        Ok(true)
    }

    /// Make `env` inherit from `parent`.
    pub fn set_parent(&self, project_id: &str, env: &str, parent: &str) -> Result<()> {
        let mut state = self.state()?;
        state
            .parents
            .insert((project_id.to_string(), env.to_string()), parent.to_string());
        Ok(())
    }

    /// Current stored version of a secret.
    pub fn secret_version(&self, project_id: &str, env: &str, name: &str) -> Result<Option<u64>> {
        let state = self.state()?;
        Ok(state
            .secrets
            .get(&(project_id.to_string(), env.to_string()))
            .and_then(|s| s.get(name))
            .and_then(|s| s.version))
    }

    /// Overwrite a stored secret without any checks.
    ///
    /// Lets tests simulate server-side corruption.
    pub fn replace_secret(&self, project_id: &str, secret: EnvironmentSecret) -> Result<()> {
        let mut state = self.state()?;
        state
            .secrets
            .entry((project_id.to_string(), secret.env.clone()))
            .or_default()
            .insert(secret.name.clone(), secret);
        Ok(())
    }
}

impl KeyServer for MemoryKeyServer {
    fn get_environment_key(&self, project_id: &str, env: &str) -> Result<Option<EnvironmentKey>> {
        let state = self.state()?;
        Ok(state
            .keys
            .get(&(project_id.to_string(), env.to_string()))
            .cloned())
    }

    fn publish_environment_key(
        &self,
        project_id: &str,
        env: &str,
        request: &PublishKeyRequest,
    ) -> Result<EnvironmentKey> {
        let mut state = self.state()?;
        let slot = (project_id.to_string(), env.to_string());
        let current = state.keys.get(&slot).cloned();

        if let Some(current) = &current {
            let stale = request.version < current.version
                || (request.version == current.version
                    && request.fingerprint != current.fingerprint);
            if stale {
                return Err(GhostableError::ConcurrencyConflict {
                    resource: format!("environment key {project_id}/{env}"),
                    expected: request.version,
                    actual: current.version,
                });
            }
        }

        let now = Utc::now();
        let mut envelope = request.envelope.clone();
        envelope.id = state.next_id("envl");
        envelope.created_at = Some(now);
        envelope.updated_at = Some(now);

        let record = match current {
            Some(current) => EnvironmentKey {
                rotated_at: if request.version > current.version {
                    Some(now)
                } else {
                    current.rotated_at
                },
                id: current.id,
                version: request.version,
                fingerprint: request.fingerprint.clone(),
                created_at: current.created_at,
                created_by_device_id: request.created_by_device_id.clone(),
                envelope,
            },
            None => EnvironmentKey {
                id: state.next_id("kek"),
                version: request.version,
                fingerprint: request.fingerprint.clone(),
                created_at: Some(now),
                rotated_at: None,
                created_by_device_id: request.created_by_device_id.clone(),
                envelope,
            },
        };

        debug!(
            project = project_id,
            env,
            version = record.version,
            recipients = record.envelope.recipients.len(),
            "stored environment key"
        );
        state.keys.insert(slot, record.clone());
        Ok(record)
    }

    fn list_devices(&self, project_id: &str) -> Result<Vec<DeviceRecord>> {
        let state = self.state()?;
        Ok(state.devices.get(project_id).cloned().unwrap_or_default())
    }

    fn list_deployment_tokens(&self, project_id: &str) -> Result<Vec<DeploymentToken>> {
        let state = self.state()?;
        Ok(state.tokens.get(project_id).cloned().unwrap_or_default())
    }

    fn pull_secrets(&self, project_id: &str, env: &str) -> Result<SecretBundle> {
        let state = self.state()?;
        let chain = state.chain(project_id, env);

        let secrets = chain
            .iter()
            .filter_map(|layer| state.secrets.get(&(project_id.to_string(), layer.clone())))
            .flat_map(|layer| layer.values().cloned())
            .collect();

        Ok(SecretBundle {
            env: env.to_string(),
            chain,
            secrets,
        })
    }

    fn push_secret(
        &self,
        project_id: &str,
        device_id: &str,
        upload: &SignedEnvironmentSecretUploadRequest,
    ) -> Result<EnvironmentSecret> {
        let mut state = self.state()?;

        let device = state
            .devices
            .get(project_id)
            .and_then(|ds| ds.iter().find(|d| d.id == device_id))
            .filter(|d| d.is_active())
            .ok_or_else(|| {
                GhostableError::Server(format!(
                    "device '{device_id}' is not an active member of project '{project_id}'"
                ))
            })?;
        if let Some(signing_key) = &device.signing_public_key {
            verify_upload(upload, &b64_decode("signingPublicKey", signing_key)?)?;
        }

        let secret = &upload.request.secret;
        let layer = state
            .secrets
            .entry((project_id.to_string(), secret.env.clone()))
            .or_default();
        let current_version = layer.get(&secret.name).and_then(|s| s.version).unwrap_or(0);

        if let Some(expected) = upload.request.if_version {
            if expected != current_version {
                return Err(GhostableError::ConcurrencyConflict {
                    resource: format!("secret {}/{}", secret.env, secret.name),
                    expected,
                    actual: current_version,
                });
            }
        }

        let mut stored = secret.clone();
        stored.version = Some(current_version + 1);
        layer.insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }
}
