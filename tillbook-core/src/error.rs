//! Error types for the ledger core.
//!
//! Chain-content faults found during verification are deliberately NOT part
//! of this taxonomy — they are diagnostics accumulated into a
//! [`VerificationResult`](crate::ledger::VerificationResult) so a forensic
//! scan never stops at the first break.

use thiserror::Error;

/// Errors raised by the key derivation primitive.
#[derive(Debug, Error)]
pub enum KdfError {
    /// The supplied parameters are unusable (empty salt, unsupported output
    /// length, out-of-range cost factors).
    #[error("invalid KDF parameters: {0}")]
    InvalidParams(String),

    /// The Argon2 primitive itself failed (e.g. memory exhaustion).
    #[error("key derivation failed: {0}")]
    Primitive(String),
}

/// Errors raised by the key vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The sealed bundle could not be opened: wrong passphrase or tampered
    /// key material. The stored bundle is left untouched.
    #[error("authentication failed for key '{key_id}': wrong passphrase or tampered key material")]
    Authentication {
        /// Identity whose bundle failed to open.
        key_id: String,
    },

    /// Key derivation failed while computing the unseal key.
    #[error(transparent)]
    Kdf(#[from] KdfError),

    /// An I/O operation on the vault directory failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Operation being performed.
        context: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A sealed bundle could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored key material has an unexpected shape (wrong length, bad
    /// base64 field).
    #[error("malformed key material: {0}")]
    MalformedKey(String),

    /// A bundle carries an envelope version this build does not understand.
    #[error("unsupported key bundle version: {0}")]
    UnsupportedVersion(u32),

    /// The key id cannot name a vault file.
    #[error("invalid key id: {0}")]
    InvalidKeyId(String),

    /// The per-identity vault lock could not be acquired.
    #[error("vault lock error: {0}")]
    Lock(String),

    /// The AEAD primitive failed on the seal side.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl VaultError {
    /// Creates an I/O error with context.
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Errors raised by the signing service.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The keypair could not be resolved from the vault.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Stored key material decodes but is not a valid key for the
    /// signature scheme.
    #[error("malformed signing key: {0}")]
    MalformedKey(String),
}

/// Errors raised by the ledger store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during database bootstrap.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// At-rest encryption was requested but this build carries no cipher.
    #[error("at-rest encryption unavailable in this build")]
    CipherUnavailable,

    /// Key derivation failed while computing the at-rest key.
    #[error(transparent)]
    Kdf(#[from] KdfError),

    /// The keying-salt record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Top-level failures from the ledger engine's verification scan.
///
/// Only catastrophic conditions surface here; content faults are reported
/// as diagnostics, not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The scan could not read the ledger.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The signing key could not be unlocked for signature checks.
    #[error(transparent)]
    Signer(#[from] SignerError),
}
