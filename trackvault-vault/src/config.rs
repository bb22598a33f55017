//! Vault configuration.

use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use trackvault_crypto::{DEFAULT_KDF_ITERATIONS, KdfParams, PasswordHashParams};

/// Tunables for the key lifecycle and session cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Idle time after which a cached data key is evicted (seconds).
    pub idle_timeout_secs: u64,

    /// How often the background sweeper scans for expired keys (seconds).
    pub sweep_interval_secs: u64,

    /// PBKDF2-HMAC-SHA512 iteration count for the key-encryption key.
    pub kdf_iterations: u32,

    /// Argon2id cost for the login password hash.
    pub password_hash: PasswordHashParams,

    /// Minimum accepted password length in characters, enforced by
    /// `register`, `change_password`, and `reset_password`.
    pub min_password_len: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600, // 1 hour
            sweep_interval_secs: 300,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            password_hash: PasswordHashParams::default(),
            min_password_len: 8,
        }
    }
}

impl VaultConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams::with_iterations(self.kdf_iterations)
    }

    /// Rejects settings that would disable expiry or key stretching.
    pub fn validate(&self) -> VaultResult<()> {
        if self.idle_timeout_secs == 0 {
            return Err(VaultError::Config("idle_timeout_secs must be > 0".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(VaultError::Config("sweep_interval_secs must be > 0".into()));
        }
        if self.kdf_iterations == 0 {
            return Err(VaultError::Config("kdf_iterations must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = VaultConfig::default();
        assert_eq!(config.idle_timeout(), Duration::from_secs(3600));
        assert_eq!(config.kdf_params().iterations, 600_000);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: VaultConfig =
            serde_json::from_str(r#"{"idle_timeout_secs": 60, "min_password_len": 12}"#).unwrap();
        assert_eq!(config.idle_timeout_secs, 60);
        assert_eq!(config.min_password_len, 12);
        assert_eq!(config.sweep_interval_secs, 300);
    }

    #[test]
    fn zero_values_rejected() {
        for config in [
            VaultConfig { idle_timeout_secs: 0, ..Default::default() },
            VaultConfig { sweep_interval_secs: 0, ..Default::default() },
            VaultConfig { kdf_iterations: 0, ..Default::default() },
        ] {
            assert!(matches!(config.validate(), Err(VaultError::Config(_))));
        }
    }
}
