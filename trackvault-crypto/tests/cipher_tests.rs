use proptest::prelude::*;
use trackvault_crypto::{
    CryptoError, DataKey, EncryptedBlob, MIN_BLOB_SIZE, NONCE_SIZE, TAG_SIZE, decrypt,
    decrypt_bytes, encrypt, generate_data_key,
};

#[test]
fn empty_plaintext_roundtrips() {
    let key = generate_data_key();
    let blob = encrypt(&key, b"").unwrap();
    assert_eq!(blob.len(), MIN_BLOB_SIZE);
    assert_eq!(decrypt(&key, &blob).unwrap(), Vec::<u8>::new());
}

#[test]
fn multi_megabyte_plaintext_roundtrips() {
    let key = generate_data_key();
    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let blob = encrypt(&key, &payload).unwrap();
    assert_eq!(blob.len(), payload.len() + NONCE_SIZE + TAG_SIZE);
    assert_eq!(decrypt(&key, &blob).unwrap(), payload);
}

#[test]
fn same_plaintext_encrypts_differently() {
    let key = generate_data_key();
    let a = encrypt(&key, b"felt tired").unwrap();
    let b = encrypt(&key, b"felt tired").unwrap();
    assert_ne!(a, b);
    assert_ne!(a.nonce(), b.nonce());
    assert_eq!(decrypt(&key, &a).unwrap(), decrypt(&key, &b).unwrap());
}

#[test]
fn wrong_key_fails_closed() {
    let k1 = generate_data_key();
    let k2 = generate_data_key();
    let blob = encrypt(&k1, b"secret note").unwrap();
    assert!(matches!(decrypt(&k2, &blob), Err(CryptoError::DecryptionFailed)));
}

#[test]
fn any_flipped_byte_is_rejected() {
    let key = generate_data_key();
    let blob = encrypt(&key, b"structured details").unwrap();
    let original = blob.clone().into_bytes();

    // Nonce, ciphertext, and tag regions all participate in authentication.
    for index in [0, NONCE_SIZE - 1, NONCE_SIZE, NONCE_SIZE + 5, original.len() - 1] {
        let mut tampered = original.clone();
        tampered[index] ^= 0x01;
        let tampered = EncryptedBlob::from_bytes(tampered).unwrap();
        assert!(
            matches!(decrypt(&key, &tampered), Err(CryptoError::DecryptionFailed)),
            "flip at byte {index} was accepted"
        );
    }
}

#[test]
fn truncated_blob_is_rejected() {
    let key = generate_data_key();
    let blob = encrypt(&key, b"hello").unwrap().into_bytes();
    assert!(matches!(
        decrypt_bytes(&key, &blob[..blob.len() - 1]),
        Err(CryptoError::DecryptionFailed)
    ));
    assert!(matches!(
        decrypt_bytes(&key, &blob[..MIN_BLOB_SIZE - 1]),
        Err(CryptoError::DecryptionFailed)
    ));
}

#[test]
fn decrypt_bytes_accepts_stored_form() {
    let key = DataKey::from_bytes([3u8; 32]);
    let stored = encrypt(&key, b"attachment").unwrap().into_bytes();
    assert_eq!(decrypt_bytes(&key, &stored).unwrap(), b"attachment");
}

proptest! {
    #[test]
    fn roundtrip_arbitrary_plaintext(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let key = generate_data_key();
        let blob = encrypt(&key, &data).unwrap();
        prop_assert_eq!(blob.plaintext_len(), data.len());
        prop_assert_eq!(decrypt(&key, &blob).unwrap(), data);
    }
}
