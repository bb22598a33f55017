//! Authenticated encryption of opaque byte blobs.
//!
//! Every blob has the layout `nonce (12) || ciphertext (N) || tag (16)` and
//! is produced by ChaCha20-Poly1305 under a fresh random nonce. Ciphertext
//! length equals plaintext length; there is no padding.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Smallest valid blob: nonce and tag around an empty ciphertext.
pub const MIN_BLOB_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// An encrypted value in its storage representation.
///
/// Deserialization applies the same length check as [`EncryptedBlob::from_bytes`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct EncryptedBlob(Vec<u8>);

impl EncryptedBlob {
    /// Wraps bytes read from storage. Anything shorter than nonce + tag
    /// cannot be a blob and is rejected as a decryption failure.
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() < MIN_BLOB_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        Ok(Self(bytes))
    }

    /// Joins a nonce with a `ciphertext || tag` buffer.
    pub fn from_parts(nonce: &[u8; NONCE_SIZE], sealed: &[u8]) -> CryptoResult<Self> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let mut bytes = Vec::with_capacity(NONCE_SIZE + sealed.len());
        bytes.extend_from_slice(nonce);
        bytes.extend_from_slice(sealed);
        Ok(Self(bytes))
    }

    pub fn nonce(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&self.0[..NONCE_SIZE]);
        nonce
    }

    /// Ciphertext without the trailing tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.0[NONCE_SIZE..self.0.len() - TAG_SIZE]
    }

    pub fn tag(&self) -> &[u8] {
        &self.0[self.0.len() - TAG_SIZE..]
    }

    /// `ciphertext || tag`, the part the AEAD consumes.
    pub fn sealed(&self) -> &[u8] {
        &self.0[NONCE_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Total encoded length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length of the plaintext this blob decrypts to.
    pub fn plaintext_len(&self) -> usize {
        self.0.len() - MIN_BLOB_SIZE
    }
}

impl TryFrom<Vec<u8>> for EncryptedBlob {
    type Error = CryptoError;

    fn try_from(bytes: Vec<u8>) -> CryptoResult<Self> {
        Self::from_bytes(bytes)
    }
}

impl From<EncryptedBlob> for Vec<u8> {
    fn from(blob: EncryptedBlob) -> Self {
        blob.0
    }
}

impl fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedBlob({} bytes)", self.0.len())
    }
}

fn cipher_for<K: SymmetricKey + ?Sized>(key: &K) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key.key_bytes()))
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn encrypt<K: SymmetricKey + ?Sized>(key: &K, plaintext: &[u8]) -> CryptoResult<EncryptedBlob> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let sealed = cipher_for(key)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    EncryptedBlob::from_parts(&nonce, &sealed)
}

/// Decrypts and authenticates a blob.
///
/// Fails closed with [`CryptoError::DecryptionFailed`]; no plaintext bytes
/// are ever returned for a blob whose tag does not verify.
pub fn decrypt<K: SymmetricKey + ?Sized>(key: &K, blob: &EncryptedBlob) -> CryptoResult<Vec<u8>> {
    let nonce = blob.nonce();
    cipher_for(key)
        .decrypt(Nonce::from_slice(&nonce), blob.sealed())
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Parses raw stored bytes as a blob and decrypts them.
pub fn decrypt_bytes<K: SymmetricKey + ?Sized>(key: &K, bytes: &[u8]) -> CryptoResult<Vec<u8>> {
    let blob = EncryptedBlob::from_bytes(bytes.to_vec())?;
    decrypt(key, &blob)
}

/// Encrypts UTF-8 text.
pub fn encrypt_string<K: SymmetricKey + ?Sized>(key: &K, text: &str) -> CryptoResult<EncryptedBlob> {
    encrypt(key, text.as_bytes())
}

/// Decrypts a blob that is expected to hold UTF-8 text.
pub fn decrypt_string<K: SymmetricKey + ?Sized>(key: &K, blob: &EncryptedBlob) -> CryptoResult<String> {
    let bytes = decrypt(key, blob)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::InvalidInput(format!("decrypted value is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DataKey;

    #[test]
    fn layout_is_nonce_ciphertext_tag() {
        let key = DataKey::from_bytes([7u8; 32]);
        let blob = encrypt(&key, b"hello").unwrap();
        assert_eq!(blob.len(), NONCE_SIZE + 5 + TAG_SIZE);
        assert_eq!(blob.ciphertext().len(), 5);
        assert_eq!(blob.tag().len(), TAG_SIZE);
        assert_eq!(blob.plaintext_len(), 5);
        assert_eq!(&blob.as_bytes()[..NONCE_SIZE], &blob.nonce());
    }

    #[test]
    fn string_roundtrip() {
        let key = DataKey::from_bytes([9u8; 32]);
        let blob = encrypt_string(&key, "felt tired").unwrap();
        assert_eq!(decrypt_string(&key, &blob).unwrap(), "felt tired");
    }

    #[test]
    fn from_bytes_rejects_short_input() {
        let err = EncryptedBlob::from_bytes(vec![0u8; MIN_BLOB_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn debug_does_not_print_contents() {
        let key = DataKey::from_bytes([1u8; 32]);
        let blob = encrypt(&key, b"secret").unwrap();
        assert_eq!(format!("{blob:?}"), format!("EncryptedBlob({} bytes)", blob.len()));
    }
}
