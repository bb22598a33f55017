//! Row types shared by every store implementation.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use trackvault_crypto::{EncryptedBlob, NONCE_SIZE, Salt, WrappedKey};
use uuid::Uuid;

/// Identity of a user account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Generates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> StorageResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| StorageError::Corrupt(format!("invalid user id {s:?}: {e}")))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The per-user key material persisted next to the account.
///
/// Always written and read as one unit: the three columns are either all
/// present or all absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionRecord {
    pub salt: Salt,
    /// `ciphertext || tag` of the wrapped DEK.
    pub wrapped_data_key: Vec<u8>,
    pub wrap_nonce: [u8; NONCE_SIZE],
}

impl EncryptionRecord {
    pub fn new(salt: Salt, wrapped: WrappedKey) -> Self {
        Self {
            salt,
            wrapped_data_key: wrapped.blob,
            wrap_nonce: wrapped.nonce,
        }
    }

    /// Rebuilds a record from nullable columns.
    ///
    /// All-NULL means a legacy account; a partial set is corruption.
    pub fn from_columns(
        salt: Option<Vec<u8>>,
        wrapped_data_key: Option<Vec<u8>>,
        wrap_nonce: Option<Vec<u8>>,
    ) -> StorageResult<Option<Self>> {
        match (salt, wrapped_data_key, wrap_nonce) {
            (None, None, None) => Ok(None),
            (Some(salt), Some(wrapped_data_key), Some(nonce)) => {
                let salt = Salt::from_slice(&salt)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                let wrap_nonce: [u8; NONCE_SIZE] = nonce.as_slice().try_into().map_err(|_| {
                    StorageError::Corrupt(format!(
                        "wrap nonce must be {NONCE_SIZE} bytes, got {}",
                        nonce.len()
                    ))
                })?;
                Ok(Some(Self {
                    salt,
                    wrapped_data_key,
                    wrap_nonce,
                }))
            }
            _ => Err(StorageError::Corrupt(
                "partial encryption record (salt, wrapped key, and nonce must be set together)"
                    .into(),
            )),
        }
    }
}

/// An account row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    /// Normalized (trimmed, lowercased) email.
    pub email: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    /// `None` for accounts created before encryption existed.
    pub encryption: Option<EncryptionRecord>,
    pub created_at: i64,
}

/// A protected column value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredValue {
    /// Legacy value written before the account was migrated.
    Plain(Vec<u8>),
    Sealed(EncryptedBlob),
}

impl StoredValue {
    pub fn is_plain(&self) -> bool {
        matches!(self, Self::Plain(_))
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }

    pub fn as_sealed(&self) -> Option<&EncryptedBlob> {
        match self {
            Self::Sealed(blob) => Some(blob),
            Self::Plain(_) => None,
        }
    }

    /// `(bytes, encrypted_flag)` as persisted.
    pub fn to_columns(&self) -> (Vec<u8>, bool) {
        match self {
            Self::Plain(bytes) => (bytes.clone(), false),
            Self::Sealed(blob) => (blob.as_bytes().to_vec(), true),
        }
    }

    pub fn from_columns(bytes: Vec<u8>, encrypted: bool) -> StorageResult<Self> {
        if !encrypted {
            return Ok(Self::Plain(bytes));
        }
        EncryptedBlob::from_bytes(bytes)
            .map(Self::Sealed)
            .map_err(|_| StorageError::Corrupt("encrypted column shorter than nonce + tag".into()))
    }
}

/// A tracked event: structured details plus an optional free-text note.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRow {
    pub id: Uuid,
    pub user_id: UserId,
    /// JSON-serialized details object.
    pub details: StoredValue,
    pub note: Option<StoredValue>,
    pub created_at: i64,
}

impl EventRow {
    pub fn has_plaintext(&self) -> bool {
        self.details.is_plain() || self.note.as_ref().is_some_and(StoredValue::is_plain)
    }

    pub fn has_sealed(&self) -> bool {
        self.details.is_sealed() || self.note.as_ref().is_some_and(StoredValue::is_sealed)
    }
}

/// A binary attachment belonging to an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentRow {
    pub id: Uuid,
    pub user_id: UserId,
    pub event_id: Uuid,
    pub filename: String,
    pub data: StoredValue,
}

/// A cached AI-analysis result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisRow {
    pub id: Uuid,
    pub user_id: UserId,
    /// JSON-serialized analysis result.
    pub result: StoredValue,
    pub created_at: i64,
}

/// Row counts removed by a purge or delete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub events: usize,
    pub attachments: usize,
    pub analyses: usize,
}

impl PurgeCounts {
    pub fn total(&self) -> usize {
        self.events + self.attachments + self.analyses
    }
}

/// Current time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
