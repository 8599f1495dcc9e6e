//! Environment key lifecycle: one symmetric key per (project, environment).
//!
//! The key store holds a read-through cache of the last key this device
//! saw.  The server's record is authoritative: whenever its version or
//! fingerprint differs from the cache, the key is unwrapped from the
//! server envelope and the cache replaced.  There is no expiry; a cache
//! entry only changes on a mismatch or an explicit invalidation.
//!
//! Resharing (publishing a new envelope for the same key) changes who
//! can unwrap the key, not the key itself.  A recipient removed by a
//! reshare keeps any copy it already cached; only
//! `rotate_environment_key` followed by re-encrypting dependent secrets
//! takes access away.

pub mod cache;

use tracing::{debug, info, warn};

use crate::crypto::keys::{fingerprints_match, KeyMaterial};
use crate::envelope::{
    build_envelope, open_envelope, EnvironmentKey, KeyHolder, Recipient, RecipientType,
    RecipientWarning, WrapContext,
};
use crate::errors::{GhostableError, Result};
use crate::identity::DeviceIdentity;
use crate::keystore::KeyStore;
use crate::server::{KeyServer, PublishKeyRequest};
use crate::token::DeploymentTokenIdentity;

pub use cache::KeyCache;

/// The environment key a caller should use.
#[derive(Debug, Clone)]
pub struct EnsuredKey {
    pub key: KeyMaterial,
    pub version: u64,
    pub fingerprint: String,
    /// `true` when the server had no key and this one must be published.
    pub created: bool,
}

/// Outcome of publishing an envelope.
#[derive(Debug)]
pub struct PublishOutcome {
    pub record: EnvironmentKey,
    pub warnings: Vec<RecipientWarning>,
}

/// Outcome of a rotation.
#[derive(Debug)]
pub struct Rotation {
    pub previous: EnsuredKey,
    pub current: EnsuredKey,
    pub outcome: PublishOutcome,
}

pub struct EnvironmentKeyService<'a> {
    cache: KeyCache<'a>,
    server: &'a dyn KeyServer,
}

impl<'a> EnvironmentKeyService<'a> {
    pub fn new(store: &'a dyn KeyStore, server: &'a dyn KeyServer) -> Self {
        Self {
            cache: KeyCache::new(store),
            server,
        }
    }

    pub fn server(&self) -> &'a dyn KeyServer {
        self.server
    }

    /// Return the current key for `project/env`, syncing the cache.
    ///
    /// With no server record, the cached key (or a fresh one at version
    /// 1) is returned with `created = true`; the caller publishes it.
    /// Otherwise the server record wins.  A server envelope without an
    /// entry for `identity` is `UnauthorizedRecipient`.
    pub fn ensure_environment_key(
        &self,
        project_id: &str,
        env: &str,
        identity: &DeviceIdentity,
    ) -> Result<EnsuredKey> {
        let cached = self.cache.read(project_id, env)?;

        let Some(record) = self.server.get_environment_key(project_id, env)? else {
            let (key, version) = match cached {
                Some(c) => {
                    debug!(
                        project = project_id,
                        env,
                        version = c.version,
                        "no server key, using cached key"
                    );
                    (c.key, c.version)
                }
                None => {
                    info!(project = project_id, env, "generating new environment key");
                    (KeyMaterial::generate(), 1)
                }
            };
            self.cache.write(project_id, env, &key, version)?;
            return Ok(EnsuredKey {
                fingerprint: key.fingerprint(),
                key,
                version,
                created: true,
            });
        };

        match cached {
            Some(c)
                if c.version == record.version
                    && fingerprints_match(&c.fingerprint, &record.fingerprint) =>
            {
                debug!(
                    project = project_id,
                    env,
                    version = c.version,
                    "environment key cache hit"
                );
                Ok(EnsuredKey {
                    key: c.key,
                    version: c.version,
                    fingerprint: c.fingerprint,
                    created: false,
                })
            }
            stale => {
                if let Some(c) = stale {
                    info!(
                        project = project_id,
                        env,
                        cached_version = c.version,
                        server_version = record.version,
                        "environment key changed on server"
                    );
                }
                let key = unwrap_record(&record, project_id, env, identity)?;
                self.cache.write(project_id, env, &key, record.version)?;
                Ok(EnsuredKey {
                    key,
                    version: record.version,
                    fingerprint: record.fingerprint,
                    created: false,
                })
            }
        }
    }

    /// Unwrap the published key for a deployment token.
    ///
    /// Never creates a key and never touches the cache.
    pub fn load_environment_key_for_token(
        &self,
        project_id: &str,
        env: &str,
        token: &DeploymentTokenIdentity,
    ) -> Result<EnsuredKey> {
        let record = self
            .server
            .get_environment_key(project_id, env)?
            .ok_or_else(|| GhostableError::NoEnvironmentKey {
                project: project_id.to_string(),
                environment: env.to_string(),
            })?;

        let key = unwrap_record(&record, project_id, env, token)?;
        Ok(EnsuredKey {
            key,
            version: record.version,
            fingerprint: record.fingerprint,
            created: false,
        })
    }

    /// Wrap `key` for every active device and deployment token of the
    /// project, plus `identity`, and publish it as `version`.
    pub fn publish_key_envelopes(
        &self,
        project_id: &str,
        env: &str,
        identity: &DeviceIdentity,
        key: &KeyMaterial,
        version: u64,
    ) -> Result<PublishOutcome> {
        let (recipients, mut warnings) = self.active_recipients(project_id)?;

        let fingerprint = key.fingerprint();
        let context = WrapContext::new(project_id, env, &fingerprint);
        let fan_out = build_envelope(key, &context, &identity.recipient(), &recipients)?;
        warnings.extend(fan_out.warnings);

        let request = PublishKeyRequest {
            version,
            fingerprint,
            created_by_device_id: Some(identity.device_id.clone()),
            envelope: fan_out.envelope,
        };
        let record = self.server.publish_environment_key(project_id, env, &request)?;

        info!(
            project = project_id,
            env,
            version,
            recipients = record.envelope.recipients.len(),
            skipped = warnings.len(),
            "published environment key"
        );
        Ok(PublishOutcome { record, warnings })
    }

    /// Republish the current key for the current recipient set.
    ///
    /// Used after linking or revoking a device or token.  The key itself
    /// does not change.
    pub fn reshare_environment_key(
        &self,
        project_id: &str,
        env: &str,
        identity: &DeviceIdentity,
    ) -> Result<PublishOutcome> {
        let current = self.ensure_environment_key(project_id, env, identity)?;
        self.publish_key_envelopes(project_id, env, identity, &current.key, current.version)
    }

    /// Replace the key with a fresh one at the next version.
    ///
    /// The cache is only updated once the server accepts the new
    /// version.  Secrets sealed under the previous key stay readable
    /// with `previous.key` until the caller re-encrypts them.
    pub fn rotate_environment_key(
        &self,
        project_id: &str,
        env: &str,
        identity: &DeviceIdentity,
    ) -> Result<Rotation> {
        let previous = self.ensure_environment_key(project_id, env, identity)?;
        let next_version = previous.version + 1;
        let key = KeyMaterial::generate();

        let outcome = self.publish_key_envelopes(project_id, env, identity, &key, next_version)?;
        self.cache.write(project_id, env, &key, next_version)?;

        info!(
            project = project_id,
            env,
            from = previous.version,
            to = next_version,
            "rotated environment key"
        );
        Ok(Rotation {
            current: EnsuredKey {
                fingerprint: key.fingerprint(),
                key,
                version: next_version,
                created: false,
            },
            previous,
            outcome,
        })
    }

    /// Drop the cached key for `project/env`.
    pub fn invalidate_cached_key(&self, project_id: &str, env: &str) -> Result<()> {
        self.cache.invalidate(project_id, env)
    }

    fn active_recipients(
        &self,
        project_id: &str,
    ) -> Result<(Vec<Recipient>, Vec<RecipientWarning>)> {
        let mut recipients = Vec::new();
        let mut warnings = Vec::new();

        let mut add = |kind: RecipientType, id: &str, parsed: Result<Recipient>| match parsed {
            Ok(r) => recipients.push(r),
            Err(e) => {
                warn!(
                    recipient = id,
                    kind = %kind,
                    error = %e,
                    "ignoring unusable recipient"
                );
                warnings.push(RecipientWarning {
                    recipient_type: kind,
                    recipient_id: id.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        for device in self.server.list_devices(project_id)? {
            if device.is_active() {
                add(RecipientType::Device, &device.id, device.recipient());
            } else {
                debug!(device = %device.id, "skipping revoked device");
            }
        }
        for token in self.server.list_deployment_tokens(project_id)? {
            if token.is_active() {
                add(RecipientType::Deployment, &token.id, token.recipient());
            } else {
                debug!(token = %token.id, "skipping revoked deployment token");
            }
        }

        Ok((recipients, warnings))
    }
}

fn unwrap_record(
    record: &EnvironmentKey,
    project_id: &str,
    env: &str,
    holder: &dyn KeyHolder,
) -> Result<KeyMaterial> {
    let context = WrapContext::new(project_id, env, &record.fingerprint);
    open_envelope(&record.envelope, holder, &context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{EncryptionKeyPolicy, IdentityManager};
    use crate::keystore::MemoryKeyStore;
    use crate::server::MemoryKeyServer;

    #[test]
    fn cached_key_survives_until_published() {
        let store = MemoryKeyStore::new();
        let server = MemoryKeyServer::new();
        let service = EnvironmentKeyService::new(&store, &server);
        let identity = IdentityManager::new(&store)
            .create("laptop", None, EncryptionKeyPolicy::Independent)
            .unwrap();

        let first = service.ensure_environment_key("p", "dev", &identity).unwrap();
        let again = service.ensure_environment_key("p", "dev", &identity).unwrap();
        assert!(first.created && again.created);
        assert_eq!(first.key, again.key);
    }

    #[test]
    fn token_load_requires_published_key() {
        let store = MemoryKeyStore::new();
        let server = MemoryKeyServer::new();
        let service = EnvironmentKeyService::new(&store, &server);
        let token = DeploymentTokenIdentity::from_seed("tok_1", &[5u8; 32]).unwrap();

        assert!(matches!(
            service.load_environment_key_for_token("p", "prod", &token),
            Err(GhostableError::NoEnvironmentKey { .. })
        ));
    }
}
