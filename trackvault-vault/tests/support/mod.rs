//! Shared helpers for vault integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use trackvault_crypto::{EncryptedBlob, PasswordHashParams, hash_password};
use trackvault_storage::{EventRow, MemoryStore, StoredValue, UserId, UserRecord, UserStore};
use trackvault_vault::{KeyLifecycle, SessionKeyCache, VaultConfig};
use uuid::Uuid;

pub const CHEAP_HASH: PasswordHashParams = PasswordHashParams {
    m_cost_kib: 8,
    t_cost: 1,
    p_cost: 1,
};

/// Low KDF and Argon2 costs so tests stay fast.
pub fn test_config() -> VaultConfig {
    VaultConfig {
        kdf_iterations: 1_000,
        password_hash: CHEAP_HASH,
        min_password_len: 4,
        ..VaultConfig::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sessions: Arc<SessionKeyCache>,
    pub vault: KeyLifecycle,
}

pub fn harness() -> Harness {
    init_tracing();
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let sessions = Arc::new(SessionKeyCache::from_config(&config));
    let vault = KeyLifecycle::new(store.clone(), store.clone(), sessions.clone(), config).unwrap();
    Harness {
        store,
        sessions,
        vault,
    }
}

/// A second vault over the same store with its own session cache, as a
/// separate server process would have.
pub fn sibling_vault(h: &Harness) -> (KeyLifecycle, Arc<SessionKeyCache>) {
    let config = test_config();
    let sessions = Arc::new(SessionKeyCache::from_config(&config));
    let vault =
        KeyLifecycle::new(h.store.clone(), h.store.clone(), sessions.clone(), config).unwrap();
    (vault, sessions)
}

/// Inserts an account as it existed before encryption: no key record.
pub fn insert_legacy_user(store: &MemoryStore, email: &str, password: &str) -> UserId {
    let user = UserRecord {
        id: UserId::new(),
        email: email.to_string(),
        password_hash: hash_password(password, &CHEAP_HASH).unwrap(),
        encryption: None,
        created_at: 0,
    };
    store.create_user(&user).unwrap();
    user.id
}

pub fn sealed_event(user: UserId, details: EncryptedBlob, note: Option<EncryptedBlob>) -> EventRow {
    EventRow {
        id: Uuid::new_v4(),
        user_id: user,
        details: StoredValue::Sealed(details),
        note: note.map(StoredValue::Sealed),
        created_at: trackvault_storage::now_millis(),
    }
}

pub fn plain_event(user: UserId, details: &str, note: Option<&str>, at: i64) -> EventRow {
    EventRow {
        id: Uuid::new_v4(),
        user_id: user,
        details: StoredValue::Plain(details.as_bytes().to_vec()),
        note: note.map(|n| StoredValue::Plain(n.as_bytes().to_vec())),
        created_at: at,
    }
}
