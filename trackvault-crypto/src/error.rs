//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during encryption, decryption, and key handling.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication failed, the blob was malformed, or the key was wrong.
    ///
    /// These cases are deliberately collapsed into one variant so callers
    /// cannot tell a wrong key from tampered ciphertext.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}
