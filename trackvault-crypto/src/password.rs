//! Argon2id password hashing for credential checks.
//!
//! The password hash gates login before any key is unwrapped. It is stored
//! as a PHC string, which carries its own salt and cost parameters, so
//! verification works across parameter changes.

use crate::error::{CryptoError, CryptoResult};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHashParams {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for PasswordHashParams {
    fn default() -> Self {
        Self {
            m_cost_kib: Params::DEFAULT_M_COST,
            t_cost: Params::DEFAULT_T_COST,
            p_cost: Params::DEFAULT_P_COST,
        }
    }
}

impl PasswordHashParams {
    fn hasher(&self) -> CryptoResult<Argon2<'static>> {
        let params = Params::new(self.m_cost_kib, self.t_cost, self.p_cost, None)
            .map_err(|e| CryptoError::PasswordHash(format!("invalid Argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hashes a password into a PHC string.
pub fn hash_password(password: &str, params: &PasswordHashParams) -> CryptoResult<String> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))?;

    let hash = params
        .hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Checks `password` against a stored PHC string.
///
/// Returns `Ok(false)` on mismatch; errors only for unparseable hashes.
pub fn verify_password(password: &str, phc: &str) -> CryptoResult<bool> {
    let parsed = PasswordHash::new(phc).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CryptoError::PasswordHash(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> PasswordHashParams {
        PasswordHashParams {
            m_cost_kib: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn hash_then_verify() {
        let phc = hash_password("p@ss1", &cheap()).unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_password("p@ss1", &phc).unwrap());
        assert!(!verify_password("wrongpass", &phc).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same", &cheap()).unwrap();
        let b = hash_password("same", &cheap()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_is_an_error() {
        assert!(verify_password("pw", "not-a-phc-string").is_err());
    }

    #[test]
    fn invalid_params_rejected() {
        let params = PasswordHashParams {
            m_cost_kib: 0,
            t_cost: 0,
            p_cost: 0,
        };
        assert!(matches!(
            hash_password("pw", &params),
            Err(CryptoError::PasswordHash(_))
        ));
    }
}
