//! Local key vault.
//!
//! Persists one passphrase-protected Ed25519 keypair per logical identity.
//! Each identity lives in its own sealed bundle file
//! `<vault-dir>/<key_id>.json` holding `{salt, iv, cipher, public}` as
//! base64, where `cipher` is the AES-256-GCM sealing of the 32-byte private
//! seed under an Argon2id key derived from the caller's passphrase.
//!
//! A failed tag check (wrong passphrase or tampered bundle) never mutates,
//! deletes, or replaces the stored material. Bundle writes go through a
//! write-to-temp-then-fsync-then-rename sequence so a crash mid-write
//! cannot leave a corrupt record, and each identity's create/load path is
//! serialized by a file lock.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::kdf::KeyDeriver;
use super::seal::{self, IV_LEN};
use crate::error::VaultError;
use crate::lock::FileLock;
use crate::passphrase::Passphrase;

const BUNDLE_VERSION: u32 = 1;
const SALT_LEN: usize = 16;

/// A named keypair resolved from the vault.
pub struct KeyIdentity {
    key_id: String,
    signing: SigningKey,
}

impl KeyIdentity {
    /// Identity name this keypair belongs to.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The public half of the keypair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Encoded public key bytes (32-byte compressed point).
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key().to_bytes()
    }

    /// The private half, for signing. Zeroized when the identity drops.
    pub(crate) const fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl std::fmt::Debug for KeyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyIdentity")
            .field("key_id", &self.key_id)
            .field("signing", &"[REDACTED]")
            .finish()
    }
}

/// Persisted sealed bundle, one file per identity.
#[derive(Serialize, Deserialize)]
struct SealedKeyBundle {
    version: u32,
    salt: String,
    iv: String,
    cipher: String,
    public: String,
}

/// Passphrase-protected store of signing keypairs.
#[derive(Debug, Clone)]
pub struct KeyVault {
    directory: PathBuf,
    deriver: KeyDeriver,
}

impl KeyVault {
    /// Creates a vault rooted at `directory`, sealing and unsealing with
    /// keys from `deriver`. The directory is created on first use.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, deriver: KeyDeriver) -> Self {
        Self {
            directory: directory.into(),
            deriver,
        }
    }

    /// Resolves the keypair for `key_id`, creating it on first use.
    ///
    /// Idempotent: two calls with the correct passphrase return keypairs
    /// with identical public-key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Authentication`] when an existing bundle fails
    /// tag verification (wrong passphrase or tampering) — the stored bundle
    /// is left untouched. Also fails on I/O, serialization, derivation, or
    /// malformed key material.
    pub fn load_or_create(
        &self,
        key_id: &str,
        passphrase: &Passphrase,
    ) -> Result<KeyIdentity, VaultError> {
        validate_key_id(key_id)?;
        fs::create_dir_all(&self.directory)
            .map_err(|err| VaultError::io("creating vault directory", err))?;

        // Serializes racing create-on-first-use writers for this identity,
        // across threads and processes.
        let lock = FileLock::open(&self.lock_path(key_id))?;
        let _guard = lock.lock()?;

        let bundle_path = self.bundle_path(key_id);
        if bundle_path.exists() {
            self.unseal(key_id, &bundle_path, passphrase)
        } else {
            self.create(key_id, &bundle_path, passphrase)
        }
    }

    /// Returns whether sealed material exists for `key_id`.
    ///
    /// # Errors
    ///
    /// Fails when `key_id` cannot name a vault file.
    pub fn exists(&self, key_id: &str) -> Result<bool, VaultError> {
        validate_key_id(key_id)?;
        Ok(self.bundle_path(key_id).exists())
    }

    fn bundle_path(&self, key_id: &str) -> PathBuf {
        self.directory.join(format!("{key_id}.json"))
    }

    fn lock_path(&self, key_id: &str) -> PathBuf {
        self.directory.join(format!("{key_id}.lock"))
    }

    fn unseal(
        &self,
        key_id: &str,
        bundle_path: &Path,
        passphrase: &Passphrase,
    ) -> Result<KeyIdentity, VaultError> {
        let bytes = fs::read(bundle_path)
            .map_err(|err| VaultError::io("reading sealed key bundle", err))?;
        let bundle: SealedKeyBundle = serde_json::from_slice(&bytes)
            .map_err(|err| VaultError::Serialization(err.to_string()))?;
        if bundle.version != BUNDLE_VERSION {
            return Err(VaultError::UnsupportedVersion(bundle.version));
        }

        let salt = decode_field(&bundle.salt, "salt")?;
        let iv = decode_iv(&bundle.iv)?;
        let cipher = decode_field(&bundle.cipher, "cipher")?;
        let public = decode_public(&bundle.public)?;

        let unseal_key = self.deriver.derive(passphrase, &salt)?;
        let seed = seal::open(&unseal_key, &iv, &cipher).map_err(|_| {
            VaultError::Authentication {
                key_id: key_id.to_string(),
            }
        })?;

        let signing = signing_key_from_seed(&seed)?;
        // The public field is outside the AEAD tag; cross-check it against
        // the sealed private key so a doctored bundle cannot redirect
        // verification to an attacker key.
        if signing.verifying_key().to_bytes() != public {
            return Err(VaultError::MalformedKey(
                "stored public key does not match sealed private key".into(),
            ));
        }

        Ok(KeyIdentity {
            key_id: key_id.to_string(),
            signing,
        })
    }

    fn create(
        &self,
        key_id: &str,
        bundle_path: &Path,
        passphrase: &Passphrase,
    ) -> Result<KeyIdentity, VaultError> {
        let signing = SigningKey::generate(&mut OsRng);

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let iv = seal::random_iv();

        let unseal_key = self.deriver.derive(passphrase, &salt)?;
        let seed = Zeroizing::new(signing.to_bytes());
        let cipher = seal::seal(&unseal_key, &iv, seed.as_slice())
            .map_err(|_| VaultError::Crypto("AES-256-GCM seal failed".into()))?;

        let bundle = SealedKeyBundle {
            version: BUNDLE_VERSION,
            salt: BASE64.encode(salt),
            iv: BASE64.encode(iv),
            cipher: BASE64.encode(&cipher),
            public: BASE64.encode(signing.verifying_key().to_bytes()),
        };
        let bytes = serde_json::to_vec_pretty(&bundle)
            .map_err(|err| VaultError::Serialization(err.to_string()))?;
        write_atomic(bundle_path, &bytes)?;

        Ok(KeyIdentity {
            key_id: key_id.to_string(),
            signing,
        })
    }
}

/// Key ids name vault files, so they are restricted to a filename-safe
/// alphabet: `[A-Za-z0-9._-]`, non-empty, no leading dot.
fn validate_key_id(key_id: &str) -> Result<(), VaultError> {
    if key_id.is_empty() {
        return Err(VaultError::InvalidKeyId("key id is empty".into()));
    }
    if key_id.starts_with('.') {
        return Err(VaultError::InvalidKeyId(format!(
            "key id '{key_id}' starts with a dot"
        )));
    }
    if let Some(bad) = key_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(VaultError::InvalidKeyId(format!(
            "key id '{key_id}' contains unsupported character '{bad}'"
        )));
    }
    Ok(())
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, VaultError> {
    BASE64
        .decode(value)
        .map_err(|err| VaultError::MalformedKey(format!("bad base64 in '{field}': {err}")))
}

fn decode_iv(value: &str) -> Result<[u8; IV_LEN], VaultError> {
    let bytes = decode_field(value, "iv")?;
    <[u8; IV_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        VaultError::MalformedKey(format!("iv length mismatch: expected {IV_LEN} bytes"))
    })
}

fn decode_public(value: &str) -> Result<[u8; 32], VaultError> {
    let bytes = decode_field(value, "public")?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| VaultError::MalformedKey("public key length mismatch".into()))
}

fn signing_key_from_seed(seed: &[u8]) -> Result<SigningKey, VaultError> {
    let seed: [u8; 32] = seed
        .try_into()
        .map_err(|_| VaultError::MalformedKey("private seed length mismatch".into()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Durable replace: write to `<path>.tmp`, fsync, rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
    let tmp = path.with_extension("json.tmp");
    let mut file =
        File::create(&tmp).map_err(|err| VaultError::io("creating temporary bundle", err))?;
    file.write_all(bytes)
        .map_err(|err| VaultError::io("writing temporary bundle", err))?;
    file.sync_all()
        .map_err(|err| VaultError::io("syncing temporary bundle", err))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|err| VaultError::io("publishing sealed key bundle", err))
}
