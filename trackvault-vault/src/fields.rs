//! Field encryption for application content.
//!
//! Every protected column goes through these helpers. They accept only
//! bytes or serializable values; key types implement neither `Serialize`
//! nor `AsRef<[u8]>`, so a key can never end up encrypted as data.

use crate::error::{VaultError, VaultResult};
use crate::session::SessionKeyCache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use trackvault_crypto::{DataKey, EncryptedBlob, decrypt, encrypt};
use trackvault_storage::UserId;

/// Returns the user's live data key, or `SessionKeyExpired`.
pub fn get_active_data_key(cache: &SessionKeyCache, user: &UserId) -> VaultResult<DataKey> {
    cache.get(user).ok_or(VaultError::SessionKeyExpired)
}

pub fn encrypt_field(dek: &DataKey, plaintext: impl AsRef<[u8]>) -> VaultResult<EncryptedBlob> {
    Ok(encrypt(dek, plaintext.as_ref())?)
}

pub fn decrypt_field(dek: &DataKey, blob: &EncryptedBlob) -> VaultResult<Vec<u8>> {
    Ok(decrypt(dek, blob)?)
}

/// Serializes `value` to JSON text and encrypts it.
pub fn encrypt_json<T: Serialize>(dek: &DataKey, value: &T) -> VaultResult<EncryptedBlob> {
    let json = serde_json::to_vec(value)?;
    encrypt_field(dek, json)
}

pub fn decrypt_json<T: DeserializeOwned>(dek: &DataKey, blob: &EncryptedBlob) -> VaultResult<T> {
    let json = decrypt_field(dek, blob)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Encrypts and decrypts on behalf of one logged-in user.
///
/// Each call fetches the live key from the cache, so an expired or
/// logged-out session fails with `SessionKeyExpired`.
#[derive(Clone)]
pub struct SessionCipher {
    user: UserId,
    cache: Arc<SessionKeyCache>,
}

impl SessionCipher {
    pub fn new(user: UserId, cache: Arc<SessionKeyCache>) -> Self {
        Self { user, cache }
    }

    pub fn user_id(&self) -> UserId {
        self.user
    }

    pub fn encrypt(&self, plaintext: impl AsRef<[u8]>) -> VaultResult<EncryptedBlob> {
        encrypt_field(&self.key()?, plaintext)
    }

    pub fn decrypt(&self, blob: &EncryptedBlob) -> VaultResult<Vec<u8>> {
        decrypt_field(&self.key()?, blob)
    }

    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> VaultResult<EncryptedBlob> {
        encrypt_json(&self.key()?, value)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, blob: &EncryptedBlob) -> VaultResult<T> {
        decrypt_json(&self.key()?, blob)
    }

    fn key(&self) -> VaultResult<DataKey> {
        get_active_data_key(&self.cache, &self.user)
    }
}
