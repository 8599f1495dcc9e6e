use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{GhostableError, Result};
use crate::identity::EncryptionKeyPolicy;
use crate::keystore::{KeyStore, MemoryKeyStore};

/// Where device keys and cached environment keys are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreBackend {
    /// The operating system's credential store.
    #[default]
    Keyring,
    /// Process memory only.  Nothing survives the invocation.
    Memory,
}

/// Project-level configuration, loaded from `.ghostable.toml`.
///
/// Every field has a default so no config file is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub key_store: KeyStoreBackend,

    /// Derive the device X25519 key from its Ed25519 seed instead of
    /// generating it independently.
    #[serde(default)]
    pub derive_encryption_key: bool,

    /// Name given to new devices (default: `<os> device`).
    #[serde(default)]
    pub device_name: Option<String>,
}

impl Settings {
    /// Name of the config file we look for in the project root.
    const FILE_NAME: &'static str = ".ghostable.toml";

    /// Load settings from `<project_dir>/.ghostable.toml`.
    ///
    /// Missing file means defaults; a file that does not parse is an error.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            GhostableError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    pub fn encryption_key_policy(&self) -> EncryptionKeyPolicy {
        if self.derive_encryption_key {
            EncryptionKeyPolicy::DerivedFromSigningKey
        } else {
            EncryptionKeyPolicy::Independent
        }
    }

    pub fn device_name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| format!("{} device", std::env::consts::OS))
    }
}

/// Open a key store for `backend`.
///
/// Asking for the OS keyring in a build without it is an error; there
/// is no fallback to weaker storage.
pub fn open_key_store(backend: KeyStoreBackend) -> Result<Box<dyn KeyStore>> {
    match backend {
        KeyStoreBackend::Memory => Ok(Box::new(MemoryKeyStore::new())),
        #[cfg(feature = "keyring-store")]
        KeyStoreBackend::Keyring => Ok(Box::new(crate::keystore::OsKeyStore::new())),
        #[cfg(not(feature = "keyring-store"))]
        KeyStoreBackend::Keyring => Err(GhostableError::KeyStoreUnavailable(
            "this build has no OS keyring support (rebuild with `--features keyring-store`)"
                .into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.key_store, KeyStoreBackend::Keyring);
        assert!(!s.derive_encryption_key);
        assert_eq!(s.encryption_key_policy(), EncryptionKeyPolicy::Independent);
    }

    #[test]
    fn load_returns_defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.key_store, KeyStoreBackend::Keyring);
    }

    #[test]
    fn load_parses_toml_file() {
        let tmp = TempDir::new().unwrap();
        let config = r#"
key_store = "memory"
derive_encryption_key = true
device_name = "build box"
"#;
        fs::write(tmp.path().join(".ghostable.toml"), config).unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.key_store, KeyStoreBackend::Memory);
        assert_eq!(
            settings.encryption_key_policy(),
            EncryptionKeyPolicy::DerivedFromSigningKey
        );
        assert_eq!(settings.device_name(), "build box");
    }

    #[test]
    fn load_errors_on_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".ghostable.toml"), "not valid {{toml").unwrap();
        assert!(Settings::load(tmp.path()).is_err());
    }

    #[test]
    fn load_rejects_unknown_backend() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".ghostable.toml"), "key_store = \"floppy\"\n").unwrap();
        assert!(matches!(
            Settings::load(tmp.path()),
            Err(GhostableError::ConfigError(_))
        ));
    }

    #[test]
    fn memory_backend_always_opens() {
        let store = open_key_store(KeyStoreBackend::Memory).unwrap();
        store.set("x", b"y").unwrap();
        assert_eq!(store.get("x").unwrap().unwrap().as_slice(), b"y");
    }

    #[test]
    fn load_ignores_keys_it_does_not_use() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(".ghostable.toml"),
            "key_store = \"memory\"\norganization = \"acme\"\n",
        )
        .unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.key_store, KeyStoreBackend::Memory);
    }

    #[cfg(feature = "keyring-store")]
    #[test]
    fn keyring_backend_opens_in_default_build() {
        assert!(open_key_store(KeyStoreBackend::default()).is_ok());
    }

    #[cfg(not(feature = "keyring-store"))]
    #[test]
    fn keyring_backend_refuses_without_feature() {
        assert!(matches!(
            open_key_store(KeyStoreBackend::Keyring),
            Err(GhostableError::KeyStoreUnavailable(_))
        ));
    }
}
