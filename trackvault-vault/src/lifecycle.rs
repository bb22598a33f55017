//! Account key lifecycle: register, login, password change and reset.
//!
//! Every user has one random data key (DEK) for their whole lifetime,
//! persisted only wrapped under a key derived from their password. Login
//! unwraps it into the [`SessionKeyCache`]; everything else reads it from
//! there. Accounts created before encryption existed have no wrapped key;
//! their first login creates one and seals their plaintext rows.
//!
//! Operations that read or replace a user's credentials hold that user's
//! account lock, so a login never unwraps a key that a concurrent reset or
//! migration in this process is about to replace. The store's
//! compare-and-set on the first record write covers other processes.

use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::fields::{SessionCipher, encrypt_field, get_active_data_key};
use crate::session::SessionKeyCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use trackvault_crypto::{
    DataKey, KdfParams, Salt, derive_kek, generate_data_key, hash_password, unwrap_data_key,
    verify_password, wrap_data_key,
};
use trackvault_storage::{
    ContentStore, EncryptionRecord, PurgeCounts, StorageError, StoredValue, UserId, UserRecord,
    UserStore, now_millis,
};
use zeroize::Zeroizing;

/// What a password reset destroyed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub user_id: UserId,
    pub purged: PurgeCounts,
}

/// Orchestrates key creation, unwrapping, rotation, and destruction.
pub struct KeyLifecycle {
    users: Arc<dyn UserStore>,
    content: Arc<dyn ContentStore>,
    sessions: Arc<SessionKeyCache>,
    config: VaultConfig,
    /// Verified against when the email is unknown, so both paths cost one
    /// Argon2 verification.
    dummy_hash: String,
    /// Per-user locks, held across credential reads and writes.
    account_locks: Mutex<HashMap<UserId, Weak<TokioMutex<()>>>>,
}

impl KeyLifecycle {
    pub fn new(
        users: Arc<dyn UserStore>,
        content: Arc<dyn ContentStore>,
        sessions: Arc<SessionKeyCache>,
        config: VaultConfig,
    ) -> VaultResult<Self> {
        config.validate()?;
        let dummy_hash = hash_password("trackvault-unknown-account", &config.password_hash)?;
        Ok(Self {
            users,
            content,
            sessions,
            config,
            dummy_hash,
            account_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn sessions(&self) -> &Arc<SessionKeyCache> {
        &self.sessions
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Creates an account with a fresh data key and leaves it logged in.
    ///
    /// Passwords shorter than [`VaultConfig::min_password_len`] (8 by
    /// default) fail with [`VaultError::PasswordTooShort`].
    pub async fn register(&self, email: &str, password: &str) -> VaultResult<UserId> {
        self.check_password_len(password)?;
        let email = normalize_email(email);
        if self.users.find_user_by_email(&email)?.is_some() {
            return Err(VaultError::EmailAlreadyRegistered);
        }

        let password = Zeroizing::new(password.to_owned());
        let hash_params = self.config.password_hash;
        let kdf = self.config.kdf_params();
        let (password_hash, record, dek) = blocking(move || {
            let password_hash = hash_password(&password, &hash_params)?;
            let dek = generate_data_key();
            let record = seal_data_key(&password, &dek, &kdf)?;
            Ok((password_hash, record, dek))
        })
        .await?;

        let user = UserRecord {
            id: UserId::new(),
            email,
            password_hash,
            encryption: Some(record),
            created_at: now_millis(),
        };
        match self.users.create_user(&user) {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => return Err(VaultError::EmailAlreadyRegistered),
            Err(e) => return Err(e.into()),
        }

        self.sessions.put(user.id, dek);
        info!("registered user {}", user.id);
        Ok(user.id)
    }

    /// Verifies credentials and caches the user's data key.
    ///
    /// Accounts without an encryption record are migrated here. Any
    /// plaintext left behind by an interrupted migration is sealed on the
    /// next successful login.
    pub async fn login(&self, email: &str, password: &str) -> VaultResult<UserId> {
        let email = normalize_email(email);
        let password = Zeroizing::new(password.to_owned());

        let Some(found) = self.users.find_user_by_email(&email)? else {
            self.reject_unknown(password).await;
            return Err(VaultError::InvalidCredentials);
        };

        let _guard = self.lock_account(&found.id).await;
        // Re-read under the lock; a reset or migration may have just finished.
        let Some(user) = self.users.get_user(&found.id)? else {
            self.reject_unknown(password).await;
            return Err(VaultError::InvalidCredentials);
        };

        if !self.verify(&password, &user.password_hash).await? {
            debug!("login for {} rejected: bad password", user.id);
            return Err(VaultError::InvalidCredentials);
        }

        match user.encryption {
            Some(record) => self.unlock(&user.id, password, record).await?,
            None => self.migrate_legacy(&user.id, password).await?,
        }

        info!("user {} logged in", user.id);
        Ok(user.id)
    }

    /// Re-wraps the same data key under a new password.
    ///
    /// Requires a live session. Content is untouched; the session is
    /// evicted afterwards so the next login proves the new password.
    pub async fn change_password(
        &self,
        user_id: &UserId,
        old_password: &str,
        new_password: &str,
    ) -> VaultResult<()> {
        self.check_password_len(new_password)?;
        let _guard = self.lock_account(user_id).await;
        let dek = self
            .sessions
            .get(user_id)
            .ok_or(VaultError::SessionKeyExpired)?;
        let user = self.users.get_user(user_id)?.ok_or(VaultError::UserNotFound)?;

        if !self.verify(old_password, &user.password_hash).await? {
            return Err(VaultError::InvalidCredentials);
        }

        let password = Zeroizing::new(new_password.to_owned());
        let hash_params = self.config.password_hash;
        let kdf = self.config.kdf_params();
        let (password_hash, record) = blocking(move || {
            let password_hash = hash_password(&password, &hash_params)?;
            let record = seal_data_key(&password, &dek, &kdf)?;
            Ok((password_hash, record))
        })
        .await?;

        self.users.update_credentials(user_id, &password_hash, &record)?;
        self.sessions.remove(user_id);
        info!("password changed for {user_id}");
        Ok(())
    }

    /// Replaces credentials without the old password. Destroys all sealed
    /// content, since it can no longer be decrypted.
    ///
    /// Failures are returned as-is; calling again after a partial run
    /// finishes the job.
    pub async fn reset_password(
        &self,
        user_id: &UserId,
        new_password: &str,
    ) -> VaultResult<ResetReport> {
        self.check_password_len(new_password)?;
        let _guard = self.lock_account(user_id).await;
        if self.users.get_user(user_id)?.is_none() {
            return Err(VaultError::UserNotFound);
        }

        self.sessions.remove(user_id);
        let purged = self.content.purge_sealed_content(user_id)?;

        let password = Zeroizing::new(new_password.to_owned());
        let hash_params = self.config.password_hash;
        let kdf = self.config.kdf_params();
        let (password_hash, record) = blocking(move || {
            let password_hash = hash_password(&password, &hash_params)?;
            let record = seal_data_key(&password, &generate_data_key(), &kdf)?;
            Ok((password_hash, record))
        })
        .await?;
        self.users.update_credentials(user_id, &password_hash, &record)?;
        // Logins from another process could still pass the old hash until
        // the write above landed.
        self.sessions.remove(user_id);

        warn!(
            "password reset for {user_id}: purged {} events, {} attachments, {} analyses",
            purged.events, purged.attachments, purged.analyses
        );
        Ok(ResetReport {
            user_id: *user_id,
            purged,
        })
    }

    /// Evicts the session. Stored data is untouched.
    pub async fn logout(&self, user_id: &UserId) {
        if self.sessions.remove(user_id) {
            debug!("user {user_id} logged out");
        }
    }

    /// Deletes the account and everything it owns after re-checking the
    /// password.
    pub async fn delete_account(&self, user_id: &UserId, password: &str) -> VaultResult<PurgeCounts> {
        let _guard = self.lock_account(user_id).await;
        let user = self.users.get_user(user_id)?.ok_or(VaultError::UserNotFound)?;
        if !self.verify(password, &user.password_hash).await? {
            return Err(VaultError::InvalidCredentials);
        }

        self.sessions.remove(user_id);
        let deleted = self.content.delete_all_content(user_id)?;
        self.users.delete_user(user_id)?;
        info!("deleted account {user_id} ({} rows)", deleted.total());
        Ok(deleted)
    }

    pub fn active_data_key(&self, user_id: &UserId) -> VaultResult<DataKey> {
        get_active_data_key(&self.sessions, user_id)
    }

    pub fn session_cipher(&self, user_id: UserId) -> SessionCipher {
        SessionCipher::new(user_id, self.sessions.clone())
    }

    /// Returns the lock serializing credential work for `user_id`.
    async fn lock_account(&self, user_id: &UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.account_locks.lock();
            locks.retain(|_, lock| lock.strong_count() > 0);
            match locks.get(user_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(TokioMutex::new(()));
                    locks.insert(*user_id, Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Spends one Argon2 verification so unknown emails cost the same.
    async fn reject_unknown(&self, password: Zeroizing<String>) {
        let dummy = self.dummy_hash.clone();
        let _ = blocking(move || Ok(verify_password(&password, &dummy)?)).await;
        debug!("login for unknown email rejected");
    }

    /// Unwraps the stored data key, caches it, and seals any plaintext an
    /// earlier migration left behind.
    async fn unlock(
        &self,
        user_id: &UserId,
        password: Zeroizing<String>,
        record: EncryptionRecord,
    ) -> VaultResult<()> {
        let kdf = self.config.kdf_params();
        let dek = blocking(move || unseal_data_key(&password, &record, &kdf))
            .await
            .inspect_err(|e| {
                if matches!(e, VaultError::DecryptionFailed) {
                    error!("stored data key for {user_id} failed to unwrap");
                }
            })?;
        self.sessions.put(*user_id, dek.clone());

        if self.content.count_plaintext(user_id)? > 0 {
            info!("resuming plaintext migration for {user_id}");
            self.seal_or_evict(user_id, &dek)?;
        }
        Ok(())
    }

    async fn migrate_legacy(&self, user_id: &UserId, password: Zeroizing<String>) -> VaultResult<()> {
        info!("migrating legacy account {user_id} to encryption");
        let kdf = self.config.kdf_params();
        let migrate_password = password.clone();
        let (record, dek) = blocking(move || {
            let dek = generate_data_key();
            let record = seal_data_key(&migrate_password, &dek, &kdf)?;
            Ok((record, dek))
        })
        .await?;

        self.sessions.put(*user_id, dek.clone());
        match self.users.set_encryption_record(user_id, &record) {
            Ok(()) => self.seal_or_evict(user_id, &dek),
            Err(StorageError::Conflict(_)) => {
                // Another process migrated first. Its key is the only one
                // that can open whatever it already sealed.
                self.sessions.remove(user_id);
                warn!("legacy migration for {user_id} lost a race; using the stored key");
                let stored = self
                    .users
                    .get_user(user_id)?
                    .and_then(|u| u.encryption)
                    .ok_or(VaultError::UserNotFound)?;
                self.unlock(user_id, password, stored).await
            }
            Err(e) => {
                self.sessions.remove(user_id);
                Err(e.into())
            }
        }
    }

    fn seal_or_evict(&self, user_id: &UserId, dek: &DataKey) -> VaultResult<()> {
        match self.seal_plaintext(user_id, dek) {
            Ok(sealed) => {
                info!("sealed {sealed} plaintext values for {user_id}");
                Ok(())
            }
            Err(e) => {
                warn!("plaintext migration for {user_id} interrupted: {e}");
                self.sessions.remove(user_id);
                Err(e)
            }
        }
    }

    /// Encrypts every remaining plaintext value, one row update at a time.
    fn seal_plaintext(&self, user_id: &UserId, dek: &DataKey) -> VaultResult<usize> {
        let mut sealed = 0;

        for mut event in self.content.list_events(user_id)? {
            if !event.has_plaintext() {
                continue;
            }
            sealed += usize::from(event.details.is_plain());
            event.details = seal_if_plain(dek, event.details)?;
            if let Some(note) = event.note.take() {
                sealed += usize::from(note.is_plain());
                event.note = Some(seal_if_plain(dek, note)?);
            }
            self.content.update_event(&event)?;
        }

        for mut attachment in self.content.list_attachments(user_id)? {
            if attachment.data.is_plain() {
                attachment.data = seal_if_plain(dek, attachment.data)?;
                self.content.update_attachment(&attachment)?;
                sealed += 1;
            }
        }

        for mut analysis in self.content.list_analyses(user_id)? {
            if analysis.result.is_plain() {
                analysis.result = seal_if_plain(dek, analysis.result)?;
                self.content.update_analysis(&analysis)?;
                sealed += 1;
            }
        }

        Ok(sealed)
    }

    async fn verify(&self, password: &str, phc: &str) -> VaultResult<bool> {
        let password = Zeroizing::new(password.to_owned());
        let phc = phc.to_owned();
        blocking(move || Ok(verify_password(&password, &phc)?)).await
    }

    fn check_password_len(&self, password: &str) -> VaultResult<()> {
        let min = self.config.min_password_len;
        if password.chars().count() < min {
            return Err(VaultError::PasswordTooShort { min });
        }
        Ok(())
    }
}

/// Trims and lowercases an email address for lookup and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn seal_if_plain(dek: &DataKey, value: StoredValue) -> VaultResult<StoredValue> {
    match value {
        StoredValue::Plain(bytes) => {
            let bytes = Zeroizing::new(bytes);
            Ok(StoredValue::Sealed(encrypt_field(dek, bytes.as_slice())?))
        }
        sealed @ StoredValue::Sealed(_) => Ok(sealed),
    }
}

/// Wraps `dek` under a KEK derived from `password` and a new salt.
fn seal_data_key(password: &str, dek: &DataKey, kdf: &KdfParams) -> VaultResult<EncryptionRecord> {
    let salt = Salt::random();
    let kek = derive_kek(password, &salt, kdf)?;
    let wrapped = wrap_data_key(&kek, dek)?;
    Ok(EncryptionRecord::new(salt, wrapped))
}

fn unseal_data_key(
    password: &str,
    record: &EncryptionRecord,
    kdf: &KdfParams,
) -> VaultResult<DataKey> {
    let kek = derive_kek(password, &record.salt, kdf)?;
    Ok(unwrap_data_key(&kek, &record.wrapped_data_key, &record.wrap_nonce)?)
}

/// Runs CPU-bound KDF work on the blocking pool.
async fn blocking<T, F>(f: F) -> VaultResult<T>
where
    F: FnOnce() -> VaultResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
