//! Tamper-evident point-of-sale ledger core.
//!
//! Every confirmed sale is appended to an immutable hash chain and
//! individually signed, so any retroactive edit or deletion of a recorded
//! sale is detectable after the fact. The crate provides:
//!
//! * [`ledger::LedgerEngine`] — appends signed, chained entries and
//!   re-derives the whole chain during verification, reporting every
//!   content fault as a forensic diagnostic.
//! * [`ledger::LedgerStore`] — `SQLite`-backed append-only storage with an
//!   explicit at-rest-encryption capability check.
//! * [`crypto::KeyVault`] — per-identity Ed25519 keypairs sealed at rest
//!   under AES-256-GCM with an Argon2id passphrase-derived key.
//! * [`crypto::SignerVerifier`] — deterministic signing and verification
//!   over vault-held keys.
//!
//! The sale payload is treated as an opaque string end to end: the core
//! never parses or validates it. Passphrases are supplied by the caller at
//! each operation, held only for the minimal derive/sign/seal scope, and
//! zeroized on every exit path.
//!
//! ```no_run
//! use tillbook_core::crypto::{KdfParams, KeyDeriver, KeyVault, SignerVerifier};
//! use tillbook_core::ledger::{LedgerEngine, LedgerStore};
//! use tillbook_core::Passphrase;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vault = KeyVault::new("/var/lib/tillbook/keys", KeyDeriver::new(KdfParams::default()));
//! let store = LedgerStore::open("/var/lib/tillbook/ledger.db".as_ref())?;
//! let engine = LedgerEngine::new(store, SignerVerifier::new(vault));
//!
//! let passphrase = Passphrase::from("till passphrase");
//! engine.append_signed_entry(r#"{"total": 12.5}"#, "till-01", &passphrase);
//!
//! let report = engine.verify_chain(Some(&passphrase))?;
//! assert!(report.is_valid());
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;
pub mod ledger;
mod lock;
mod passphrase;

pub use error::{EngineError, KdfError, SignerError, StoreError, VaultError};
pub use lock::{FileLock, FileLockGuard};
pub use passphrase::Passphrase;
