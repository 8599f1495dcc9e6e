//! Durable, named secret-bytes storage.
//!
//! Every component that needs local persistence receives a `&dyn KeyStore`
//! chosen once by the entry point.  Values are raw bytes; implementations
//! store them base64-encoded.
//!
//! Entry names used by this crate:
//! - `device:identity`               identity metadata (public keys, platform)
//! - `device:<id>:signing`           Ed25519 seed
//! - `device:<id>:encryption`        X25519 secret
//! - `envkey:<hex project>:<hex env>` cached environment key record

pub mod memory;
#[cfg(feature = "keyring-store")]
pub mod os;

use zeroize::Zeroizing;

use crate::errors::Result;

pub use memory::MemoryKeyStore;
#[cfg(feature = "keyring-store")]
pub use os::OsKeyStore;

/// Capability for storing secret bytes by name.
pub trait KeyStore {
    /// Read an entry.  Returns `None` if it does not exist.
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Create or overwrite an entry.
    fn set(&self, name: &str, value: &[u8]) -> Result<()>;

    /// Remove an entry.  Removing a missing entry is not an error.
    fn delete(&self, name: &str) -> Result<()>;
}

/// Name of the identity metadata entry.
pub const IDENTITY_ENTRY: &str = "device:identity";

/// Entry holding a device's Ed25519 seed.
pub fn signing_key_entry(device_id: &str) -> String {
    format!("device:{device_id}:signing")
}

/// Entry holding a device's X25519 secret.
pub fn encryption_key_entry(device_id: &str) -> String {
    format!("device:{device_id}:encryption")
}

/// Entry holding the cached environment key for `project_id/env_name`.
///
/// Both parts are hex-encoded so a `:` inside either cannot make two
/// environments share an entry.
pub fn environment_key_entry(project_id: &str, env_name: &str) -> String {
    format!("envkey:{}:{}", hex::encode(project_id), hex::encode(env_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_names_are_scoped() {
        assert_eq!(signing_key_entry("dev_1"), "device:dev_1:signing");
        assert_eq!(encryption_key_entry("dev_1"), "device:dev_1:encryption");
        assert_eq!(environment_key_entry("p1", "prod"), "envkey:7031:70726f64");
    }

    #[test]
    fn environment_entries_do_not_collide_on_separator() {
        assert_ne!(
            environment_key_entry("a:b", "c"),
            environment_key_entry("a", "b:c")
        );
        assert_ne!(environment_key_entry("", "a:"), environment_key_entry("a", ""));
    }
}
