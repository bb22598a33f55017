//! Vault error types.

use thiserror::Error;
use trackvault_crypto::CryptoError;
use trackvault_storage::StorageError;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Unknown email or wrong password. The two are never distinguished.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email already registered")]
    EmailAlreadyRegistered,

    /// No live data key for the user; they must log in again.
    #[error("session key expired")]
    SessionKeyExpired,

    /// Authenticated decryption failed: wrong key or tampered data.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("password too short (min {min} characters)")]
    PasswordTooShort { min: usize },

    #[error("user not found")]
    UserNotFound,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking KDF task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => Self::DecryptionFailed,
            other => Self::Crypto(other),
        }
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
