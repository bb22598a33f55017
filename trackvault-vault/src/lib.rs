//! Per-user key lifecycle for TrackVault.
//!
//! [`KeyLifecycle`] owns account creation, login, password rotation and
//! reset. Logged-in users' data keys live in a [`SessionKeyCache`]; content
//! code reaches them only through the helpers in [`fields`].
//!
//! ```no_run
//! # async fn demo() -> trackvault_vault::VaultResult<()> {
//! use std::sync::Arc;
//! use trackvault_storage::MemoryStore;
//! use trackvault_vault::{KeyLifecycle, SessionKeyCache, VaultConfig};
//!
//! let store = Arc::new(MemoryStore::new());
//! let config = VaultConfig::default();
//! let sessions = Arc::new(SessionKeyCache::from_config(&config));
//! let _sweeper = sessions.start_sweeper(config.sweep_interval());
//! let vault = KeyLifecycle::new(store.clone(), store, sessions, config)?;
//!
//! let user = vault.register("alice@example.com", "correct horse").await?;
//! let blob = vault.session_cipher(user).encrypt("felt tired")?;
//! # let _ = blob;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod fields;
mod lifecycle;
mod session;

pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use fields::{
    SessionCipher, decrypt_field, decrypt_json, encrypt_field, encrypt_json, get_active_data_key,
};
pub use lifecycle::{KeyLifecycle, ResetReport, normalize_email};
pub use session::{MIN_SWEEP_INTERVAL, SessionKeyCache, SweeperHandle};
