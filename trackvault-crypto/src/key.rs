//! Key material and password-based key derivation.
//!
//! Two key types exist and they are intentionally not interchangeable:
//!
//! - [`DataKey`] (DEK) encrypts user content. It is random and constant for
//!   the lifetime of an account across password changes.
//! - [`KeyEncryptionKey`] (KEK) is derived from the password with
//!   PBKDF2-HMAC-SHA512 and only ever wraps the DEK.
//!
//! Neither type implements `Serialize` or `AsRef<[u8]>`, so raw key bytes
//! cannot end up in a JSON document or be passed where plaintext is expected
//! without an explicit `as_bytes()` call.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the per-user KDF salt in bytes.
pub const SALT_SIZE: usize = 32;

/// Production PBKDF2 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

mod sealed {
    pub trait Sealed {}
}

/// A 256-bit key usable with the byte cipher.
///
/// Sealed: only [`DataKey`] and [`KeyEncryptionKey`] implement it.
pub trait SymmetricKey: sealed::Sealed {
    /// Raw key bytes. Never log or persist these.
    fn key_bytes(&self) -> &[u8; KEY_SIZE];
}

/// Per-user data-encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; KEY_SIZE]);

impl DataKey {
    /// Creates a data key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl sealed::Sealed for DataKey {}

impl SymmetricKey for DataKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// Password-derived key-encryption key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey([u8; KEY_SIZE]);

impl KeyEncryptionKey {
    /// Creates a KEK from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl sealed::Sealed for KeyEncryptionKey {}

impl SymmetricKey for KeyEncryptionKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyEncryptionKey([REDACTED])")
    }
}

/// Random per-user salt for KEK derivation. Generated once, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a fresh random salt.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses a salt read back from storage.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; SALT_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidInput(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// PBKDF2 parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
}

impl KdfParams {
    /// Custom iteration count. Production code should use `Default`.
    pub fn with_iterations(iterations: u32) -> Self {
        Self { iterations }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

/// Derives a KEK from a password and salt with PBKDF2-HMAC-SHA512.
///
/// Deterministic for a given `(password, salt, params)`. CPU-bound;
/// async callers should run it on a blocking thread.
pub fn derive_kek(
    password: &str,
    salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<KeyEncryptionKey> {
    if password.is_empty() {
        return Err(CryptoError::InvalidInput("password must not be empty".into()));
    }
    if params.iterations == 0 {
        return Err(CryptoError::InvalidInput(
            "iteration count must be positive".into(),
        ));
    }

    let mut out = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        salt.as_bytes(),
        params.iterations,
        &mut out,
    );
    let kek = KeyEncryptionKey::from_bytes(out);
    out.zeroize();
    Ok(kek)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams::with_iterations(1_000)
    }

    #[test]
    fn derivation_is_deterministic() {
        let salt = Salt::random();
        let a = derive_kek("hunter22", &salt, &fast()).unwrap();
        let b = derive_kek("hunter22", &salt, &fast()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_password_gives_different_key() {
        let salt = Salt::random();
        let a = derive_kek("hunter22", &salt, &fast()).unwrap();
        let b = derive_kek("hunter23", &salt, &fast()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salt_gives_different_key() {
        let a = derive_kek("hunter22", &Salt::random(), &fast()).unwrap();
        let b = derive_kek("hunter22", &Salt::random(), &fast()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn iteration_count_changes_the_key() {
        let salt = Salt::random();
        let a = derive_kek("hunter22", &salt, &KdfParams::with_iterations(1_000)).unwrap();
        let b = derive_kek("hunter22", &salt, &KdfParams::with_iterations(1_001)).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn empty_password_rejected() {
        let err = derive_kek("", &Salt::random(), &fast()).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidInput(_)));
    }

    #[test]
    fn zero_iterations_rejected() {
        let err = derive_kek("pw", &Salt::random(), &KdfParams::with_iterations(0)).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidInput(_)));
    }

    #[test]
    fn default_params_meet_minimum() {
        assert!(KdfParams::default().iterations >= 600_000);
    }

    #[test]
    fn salt_from_slice_checks_length() {
        assert!(Salt::from_slice(&[0u8; 16]).is_err());
        let salt = Salt::random();
        assert_eq!(Salt::from_slice(salt.as_bytes()).unwrap(), salt);
    }

    #[test]
    fn random_salts_differ() {
        assert_ne!(Salt::random(), Salt::random());
    }

    #[test]
    fn debug_output_redacts_keys() {
        let dek = DataKey::from_bytes([0x41; KEY_SIZE]);
        let rendered = format!("{dek:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("65"));
    }
}
