use thiserror::Error;

/// All errors that can occur in Ghostable.
#[derive(Debug, Error)]
pub enum GhostableError {
    // --- Capability errors (fatal) ---
    #[error("No device identity is linked on this machine — run `ghostable device link` first")]
    NoIdentity,

    #[error(
        "Not authorized: the environment key for '{project}/{environment}' has no envelope for {recipient}"
    )]
    UnauthorizedRecipient {
        project: String,
        environment: String,
        recipient: String,
    },

    #[error("No environment key has been published for '{project}/{environment}'")]
    NoEnvironmentKey { project: String, environment: String },

    #[error("Key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    // --- Crypto errors ---
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed — wrong key, tampered data or mismatched context")]
    DecryptionFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    // --- Server interaction ---
    #[error("Version conflict on '{resource}': expected {expected}, server has {actual} — re-fetch and retry")]
    ConcurrencyConflict {
        resource: String,
        expected: u64,
        actual: u64,
    },

    #[error("Server error: {0}")]
    Server(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),
}

/// Convenience type alias for Ghostable results.
pub type Result<T> = std::result::Result<T, GhostableError>;
