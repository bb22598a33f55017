//! Envelope wrapping of per-user data keys.
//!
//! The DEK is encrypted ("wrapped") under a password-derived KEK with the
//! same byte cipher used for content. Rotating the password only re-wraps
//! the DEK; content ciphertext is never touched.

use crate::cipher::{self, EncryptedBlob, NONCE_SIZE, TAG_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{DataKey, KEY_SIZE, KeyEncryptionKey};
use rand::RngCore;
use zeroize::Zeroize;

/// Length of a wrapped DEK without its nonce (`ciphertext || tag`).
pub const WRAPPED_KEY_SIZE: usize = KEY_SIZE + TAG_SIZE;

/// A DEK wrapped under a KEK, split the way it is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedKey {
    /// `ciphertext || tag` of the 32-byte DEK.
    pub blob: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

/// Generates a fresh random data key.
pub fn generate_data_key() -> DataKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut bytes);
    let key = DataKey::from_bytes(bytes);
    bytes.zeroize();
    key
}

/// Wraps `dek` under `kek`.
pub fn wrap_data_key(kek: &KeyEncryptionKey, dek: &DataKey) -> CryptoResult<WrappedKey> {
    let blob = cipher::encrypt(kek, dek.as_bytes())?;
    Ok(WrappedKey {
        nonce: blob.nonce(),
        blob: blob.sealed().to_vec(),
    })
}

/// Unwraps a DEK.
///
/// A wrong KEK, a tampered blob, a malformed nonce, and a payload of the
/// wrong length all fail with the same [`CryptoError::DecryptionFailed`].
pub fn unwrap_data_key(
    kek: &KeyEncryptionKey,
    wrapped_blob: &[u8],
    nonce: &[u8],
) -> CryptoResult<DataKey> {
    let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| CryptoError::DecryptionFailed)?;
    let blob = EncryptedBlob::from_parts(&nonce, wrapped_blob)?;

    let mut plaintext = cipher::decrypt(kek, &blob)?;
    let result = <[u8; KEY_SIZE]>::try_from(plaintext.as_slice())
        .map(DataKey::from_bytes)
        .map_err(|_| CryptoError::DecryptionFailed);
    plaintext.zeroize();
    result
}

impl WrappedKey {
    /// Convenience for [`unwrap_data_key`] on a value read as a whole.
    pub fn unwrap_with(&self, kek: &KeyEncryptionKey) -> CryptoResult<DataKey> {
        unwrap_data_key(kek, &self.blob, &self.nonce)
    }
}
