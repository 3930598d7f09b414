//! Key derivation, sealed key storage, and signing.

pub mod kdf;
pub(crate) mod seal;
pub mod signer;
pub mod vault;

pub use kdf::{DerivedKey, KdfParams, KeyDeriver};
pub use signer::SignerVerifier;
pub use vault::{KeyIdentity, KeyVault};
