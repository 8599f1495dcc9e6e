//! `ghostable device`: link, show, rename and unlink the local identity.

use dialoguer::Confirm;

use crate::cli::output;
use crate::config::Settings;
use crate::errors::{GhostableError, Result};
use crate::identity::{EncryptionKeyPolicy, IdentityManager};
use crate::keystore::KeyStore;

/// Execute `device link`.
pub fn execute_link(
    store: &dyn KeyStore,
    settings: &Settings,
    name: Option<&str>,
    device_id: Option<&str>,
    derive_encryption_key: bool,
) -> Result<()> {
    let policy = if derive_encryption_key {
        EncryptionKeyPolicy::DerivedFromSigningKey
    } else {
        settings.encryption_key_policy()
    };
    let name = name.map(str::to_string).unwrap_or_else(|| settings.device_name());

    let identity = IdentityManager::new(store).create(&name, device_id, policy)?;

    output::success(&format!("Linked device '{}' ({})", identity.name, identity.device_id));
    output::print_identity(&identity.summary());
    output::tip("Register the encryption public key with your project to receive environment keys.");
    Ok(())
}

/// Execute `device show`.
pub fn execute_show(store: &dyn KeyStore, json: bool) -> Result<()> {
    let summary = IdentityManager::new(store)
        .summary()?
        .ok_or(GhostableError::NoIdentity)?;

    if json {
        let rendered = serde_json::to_string_pretty(&summary)
            .map_err(|e| GhostableError::SerializationError(format!("identity: {e}")))?;
        println!("{rendered}");
    } else {
        output::print_identity(&summary);
    }
    Ok(())
}

/// Execute `device rename`.
pub fn execute_rename(store: &dyn KeyStore, device_id: &str, name: Option<&str>) -> Result<()> {
    let identity = IdentityManager::new(store).rename(device_id, name)?;
    output::success(&format!(
        "Device is now '{}' ({})",
        identity.name, identity.device_id
    ));
    Ok(())
}

/// Execute `device unlink`.
pub fn execute_unlink(store: &dyn KeyStore, force: bool) -> Result<()> {
    let manager = IdentityManager::new(store);
    let Some(summary) = manager.summary()? else {
        return Err(GhostableError::NoIdentity);
    };

    // Unless --force is set, ask for confirmation before deleting.
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete device '{}' and its private keys? This cannot be undone.",
                summary.device_id
            ))
            .default(false)
            .interact()
            .map_err(|e| GhostableError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    manager.destroy()?;
    output::success(&format!("Unlinked device '{}'", summary.device_id));
    output::tip("Revoke the device on the server and reshare affected environments.");
    Ok(())
}
