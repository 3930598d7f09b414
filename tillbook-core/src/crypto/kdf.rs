//! Passphrase key derivation.
//!
//! Turns a caller-supplied passphrase plus a per-identity salt into the
//! fixed-length symmetric key that seals private key material. Argon2id is
//! memory-hard, so an attacker who copies a sealed bundle off disk cannot
//! grind passphrases cheaply.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KdfError;
use crate::passphrase::Passphrase;

/// Cost parameters for the Argon2id derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Number of passes over memory.
    pub iterations: u32,
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
    /// Output length in bytes. Must equal [`DerivedKey::LEN`].
    pub output_len: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: 3,
            memory_kib: 65536,
            parallelism: 1,
            output_len: DerivedKey::LEN,
        }
    }
}

/// A symmetric key derived from a passphrase (256-bit).
///
/// Ephemeral: exists only to seal or open private key material, and is
/// zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; Self::LEN]);

impl DerivedKey {
    /// Key length in bytes.
    pub const LEN: usize = 32;

    /// Returns a reference to the raw key bytes.
    #[must_use]
    pub(crate) const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Derives fixed-length keys with Argon2id.
#[derive(Debug, Clone, Copy)]
pub struct KeyDeriver {
    params: KdfParams,
}

impl KeyDeriver {
    /// Creates a deriver with the given cost parameters.
    #[must_use]
    pub const fn new(params: KdfParams) -> Self {
        Self { params }
    }

    /// Derives a key from `passphrase` and `salt`.
    ///
    /// Deterministic: identical passphrase, salt, and parameters always
    /// produce the same key. The passphrase is consumed read-only; zeroing
    /// it afterwards is the holder's responsibility (the [`Passphrase`]
    /// wrapper does this on drop).
    ///
    /// # Errors
    ///
    /// Returns [`KdfError::InvalidParams`] for an empty salt or unusable
    /// cost parameters, and [`KdfError::Primitive`] when the Argon2
    /// computation itself fails.
    pub fn derive(&self, passphrase: &Passphrase, salt: &[u8]) -> Result<DerivedKey, KdfError> {
        if salt.is_empty() {
            return Err(KdfError::InvalidParams("salt must not be empty".into()));
        }
        if self.params.output_len != DerivedKey::LEN {
            return Err(KdfError::InvalidParams(format!(
                "unsupported output length {} (expected {})",
                self.params.output_len,
                DerivedKey::LEN
            )));
        }

        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(self.params.output_len),
        )
        .map_err(|err| KdfError::InvalidParams(err.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = [0u8; DerivedKey::LEN];
        argon2
            .hash_password_into(passphrase.expose(), salt, &mut output)
            .map_err(|err| {
                output.zeroize();
                KdfError::Primitive(err.to_string())
            })?;
        Ok(DerivedKey(output))
    }
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new(KdfParams::default())
    }
}

#[cfg(test)]
pub(crate) fn fast_test_params() -> KdfParams {
    // Keep derivation out of the critical path of unrelated tests.
    KdfParams {
        iterations: 1,
        memory_kib: 16,
        parallelism: 1,
        output_len: DerivedKey::LEN,
    }
}
