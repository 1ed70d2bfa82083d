use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in Keyward.
#[derive(Debug, Error)]
pub enum KeywardError {
    // --- Access errors ---
    /// The secret (or request) does not exist, or is hidden from the caller.
    /// Both cases produce the same message so existence never leaks.
    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Someone else already acted: {0}")]
    InvalidState(String),

    #[error("Could not read revision {0}: stored data failed integrity checks")]
    DataIntegrity(u64),

    #[error("Unknown or inactive access token")]
    Unauthenticated,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // --- Crypto errors ---
    #[error("Encryption key is not available")]
    KeyUnavailable,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed — wrong password or corrupted data")]
    DecryptionFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // --- Vault file errors ---
    #[error("Vault not found at {0}")]
    VaultNotFound(PathBuf),

    #[error("Vault already exists at {0}")]
    VaultAlreadyExists(PathBuf),

    #[error("Invalid vault format: {0}")]
    InvalidVaultFormat(String),

    #[error("HMAC verification failed — vault file may be tampered")]
    HmacMismatch,

    #[error("HMAC error: {0}")]
    HmacError(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    #[error("Directory error: {0}")]
    DirectoryError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- Audit errors ---
    #[error("Audit error: {0}")]
    AuditError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),
}

impl KeywardError {
    /// Returns `true` when the caller lost a race against another actor
    /// and may simply reload and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::InvalidState(_))
    }
}

/// Convenience type alias for Keyward results.
pub type Result<T> = std::result::Result<T, KeywardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_race_outcomes_are_retryable() {
        assert!(KeywardError::Conflict("pending".into()).is_retryable());
        assert!(KeywardError::InvalidState("approved".into()).is_retryable());
        assert!(!KeywardError::Forbidden("nope".into()).is_retryable());
        assert!(!KeywardError::DataIntegrity(3).is_retryable());
    }

    #[test]
    fn data_integrity_message_is_opaque() {
        let msg = KeywardError::DataIntegrity(7).to_string();
        assert!(msg.contains("revision 7"));
        assert!(!msg.to_lowercase().contains("plaintext"));
    }
}
