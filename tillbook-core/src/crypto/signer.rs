//! Signing and verification service.
//!
//! Signs byte payloads with Ed25519 keypairs resolved from the
//! [`KeyVault`]. Ed25519 is deterministic: no randomness enters after key
//! generation, so the same payload and key always produce the same
//! signature.
//!
//! Failure classes are kept distinct: a signature that simply does not
//! match (including undecodable signature text) verifies to `false`, while
//! a key that cannot be unlocked or malformed key material is an error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer as _, Verifier as _};

use super::vault::KeyVault;
use crate::error::SignerError;
use crate::passphrase::Passphrase;

/// Signs and verifies payloads with vault-held keypairs.
#[derive(Debug, Clone)]
pub struct SignerVerifier {
    vault: KeyVault,
}

impl SignerVerifier {
    /// Creates a service over the given vault.
    #[must_use]
    pub const fn new(vault: KeyVault) -> Self {
        Self { vault }
    }

    /// Signs `payload` with the identity named by `key_id`, creating the
    /// keypair on first use. Returns the base64 signature.
    ///
    /// # Errors
    ///
    /// Fails when the keypair cannot be resolved from the vault.
    pub fn sign(
        &self,
        payload: &[u8],
        key_id: &str,
        passphrase: &Passphrase,
    ) -> Result<String, SignerError> {
        let identity = self.vault.load_or_create(key_id, passphrase)?;
        let signature = identity.signing_key().sign(payload);
        Ok(BASE64.encode(signature.to_bytes()))
    }

    /// Checks `signature_b64` over `payload` under the identity named by
    /// `key_id`.
    ///
    /// Returns `false` for any pure cryptographic mismatch — wrong
    /// signature, flipped payload byte, or signature text that does not
    /// even decode.
    ///
    /// # Errors
    ///
    /// Fails when the keypair cannot be unlocked
    /// ([`VaultError::Authentication`](crate::error::VaultError)) or the
    /// stored key material is unusable — unavailability is not a mismatch.
    pub fn verify(
        &self,
        payload: &[u8],
        signature_b64: &str,
        key_id: &str,
        passphrase: &Passphrase,
    ) -> Result<bool, SignerError> {
        let identity = self.vault.load_or_create(key_id, passphrase)?;

        let Ok(signature_bytes) = BASE64.decode(signature_b64) else {
            return Ok(false);
        };
        let Ok(signature) = Signature::from_slice(&signature_bytes) else {
            return Ok(false);
        };
        Ok(identity
            .verifying_key()
            .verify(payload, &signature)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::{fast_test_params, KeyDeriver};
    use crate::error::VaultError;

    fn test_signer(dir: &std::path::Path) -> SignerVerifier {
        SignerVerifier::new(KeyVault::new(dir, KeyDeriver::new(fast_test_params())))
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let signer = test_signer(dir.path());
        let passphrase = Passphrase::from("till passphrase");

        let signature = signer
            .sign(b"payload", "till-01", &passphrase)
            .expect("sign");
        assert!(signer
            .verify(b"payload", &signature, "till-01", &passphrase)
            .expect("verify"));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let signer = test_signer(dir.path());
        let passphrase = Passphrase::from("till passphrase");

        let first = signer.sign(b"payload", "till-01", &passphrase).expect("sign");
        let second = signer.sign(b"payload", "till-01", &passphrase).expect("sign");
        assert_eq!(first, second);
    }

    #[test]
    fn test_flipped_payload_fails_verification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let signer = test_signer(dir.path());
        let passphrase = Passphrase::from("till passphrase");

        let signature = signer
            .sign(b"payload", "till-01", &passphrase)
            .expect("sign");
        assert!(!signer
            .verify(b"pa{load", &signature, "till-01", &passphrase)
            .expect("verify"));
    }

    #[test]
    fn test_flipped_signature_fails_verification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let signer = test_signer(dir.path());
        let passphrase = Passphrase::from("till passphrase");

        let signature = signer
            .sign(b"payload", "till-01", &passphrase)
            .expect("sign");
        let mut bytes = BASE64.decode(&signature).expect("decode");
        bytes[10] ^= 0x01;
        let tampered = BASE64.encode(&bytes);
        assert!(!signer
            .verify(b"payload", &tampered, "till-01", &passphrase)
            .expect("verify"));
    }

    #[test]
    fn test_undecodable_signature_is_a_mismatch_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let signer = test_signer(dir.path());
        let passphrase = Passphrase::from("till passphrase");
        signer.sign(b"payload", "till-01", &passphrase).expect("sign");

        assert!(!signer
            .verify(b"payload", "not base64!!", "till-01", &passphrase)
            .expect("verify"));
        assert!(!signer
            .verify(b"payload", "c2hvcnQ=", "till-01", &passphrase)
            .expect("verify"));
    }

    #[test]
    fn test_locked_key_is_an_error_not_a_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let signer = test_signer(dir.path());

        let signature = signer
            .sign(b"payload", "till-01", &Passphrase::from("right"))
            .expect("sign");
        let result = signer.verify(b"payload", &signature, "till-01", &Passphrase::from("wrong"));
        assert!(matches!(
            result,
            Err(SignerError::Vault(VaultError::Authentication { .. }))
        ));
    }
}
