//! Encryption layer for TrackVault.
//!
//! Provides per-user envelope encryption using:
//! - PBKDF2-HMAC-SHA512 for key derivation from passwords
//! - ChaCha20-Poly1305 for authenticated encryption
//! - Argon2id for password verification
//! - Secure key management with zeroization
//!
//! # Architecture
//!
//! The encryption uses a two-tier key system:
//!
//! 1. **Key-encryption key (KEK)**: Derived from the user's password and a
//!    random per-user salt. Never stored; derived on each login.
//!
//! 2. **Data-encryption key (DEK)**: A random key generated once per user.
//!    It encrypts all of that user's content and is stored only wrapped
//!    under the KEK.
//!
//! Changing the password re-wraps the DEK without touching any content.

mod cipher;
pub mod envelope;
mod error;
mod key;
pub mod password;

pub use cipher::{
    EncryptedBlob, MIN_BLOB_SIZE, NONCE_SIZE, TAG_SIZE, decrypt, decrypt_bytes, decrypt_string,
    encrypt, encrypt_string,
};
pub use envelope::{
    WRAPPED_KEY_SIZE, WrappedKey, generate_data_key, unwrap_data_key, wrap_data_key,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    DEFAULT_KDF_ITERATIONS, DataKey, KEY_SIZE, KdfParams, KeyEncryptionKey, SALT_SIZE, Salt,
    SymmetricKey, derive_kek,
};
pub use password::{PasswordHashParams, hash_password, verify_password};
