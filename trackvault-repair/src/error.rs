//! Repair error types.

use thiserror::Error;
use trackvault_crypto::CryptoError;
use trackvault_storage::StorageError;

/// Result type for repair operations.
pub type RepairResult<T> = Result<T, RepairError>;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account has no encryption record yet; nothing is sealed.
    #[error("account has not been migrated to encryption")]
    NotMigrated,

    /// The password verified but the stored data key would not unwrap.
    #[error("stored data key failed to decrypt")]
    Decryption,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid detector pattern: {0}")]
    Pattern(String),
}
