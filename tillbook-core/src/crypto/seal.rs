//! AEAD seal/open for private key material.
//!
//! Narrow interface: plaintext + derived key go in, iv + ciphertext come
//! out, and the reverse either yields the plaintext or fails tag
//! verification. Keeping the AEAD behind these two functions means the
//! algorithm (AES-256-GCM, 128-bit tag) can be swapped without touching the
//! vault, signer, or ledger engine.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use super::kdf::DerivedKey;

/// AEAD nonce length in bytes.
pub(crate) const IV_LEN: usize = 12;

/// Generates a random IV from the OS RNG.
pub(crate) fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Seals `plaintext` under `key` with the given IV.
///
/// The returned ciphertext carries the 128-bit authentication tag.
pub(crate) fn seal(
    key: &DerivedKey,
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, aes_gcm::aead::Error> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).expect("key length is always 32");
    cipher.encrypt(Nonce::from_slice(iv), plaintext)
}

/// Opens a sealed record.
///
/// Fails whenever the tag does not verify: wrong key (wrong passphrase) or
/// tampered ciphertext. The plaintext is returned in a zeroizing buffer.
pub(crate) fn open(
    key: &DerivedKey,
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, aes_gcm::aead::Error> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).expect("key length is always 32");
    cipher.decrypt(Nonce::from_slice(iv), ciphertext).map(Zeroizing::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::{fast_test_params, KeyDeriver};
    use crate::passphrase::Passphrase;

    fn test_key(passphrase: &str) -> DerivedKey {
        KeyDeriver::new(fast_test_params())
            .derive(&Passphrase::from(passphrase), b"0123456789abcdef")
            .expect("derive")
    }

    #[test]
    fn test_seal_open_round_trip() {
        let key = test_key("till passphrase");
        let iv = random_iv();

        let sealed = seal(&key, &iv, b"private key bytes").expect("seal");
        assert_eq!(sealed.len(), b"private key bytes".len() + 16);

        let opened = open(&key, &iv, &sealed).expect("open");
        assert_eq!(&*opened, b"private key bytes");
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let key = test_key("till passphrase");
        let iv = random_iv();

        let mut sealed = seal(&key, &iv, b"private key bytes").expect("seal");
        sealed[0] ^= 0xFF;
        assert!(open(&key, &iv, &sealed).is_err());
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let iv = random_iv();
        let sealed = seal(&test_key("right"), &iv, b"private key bytes").expect("seal");
        assert!(open(&test_key("wrong"), &iv, &sealed).is_err());
    }
}
