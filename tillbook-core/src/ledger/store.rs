//! `SQLite`-backed ledger storage.
//!
//! Bootstraps the idempotent ledger schema, serializes all access behind a
//! connection mutex, and exposes the append path as a scoped IMMEDIATE
//! transaction so the read-tail/insert sequence can never interleave with
//! a concurrent append.
//!
//! # At-rest encryption
//!
//! At bootstrap the store probes whether the linked `SQLite` build carries a
//! page cipher (`PRAGMA cipher_version`) and records the answer as a
//! [`CipherCapability`] fact instead of silently ignoring a failed
//! `PRAGMA key`. Without a cipher the ledger is integrity-protected (hash
//! chain + signatures) but payload contents are plaintext on disk;
//! [`LedgerStore::open_encrypted`] refuses to pretend otherwise and fails
//! with [`StoreError::CipherUnavailable`].

// Mutex poisoning means another thread panicked mid-operation; there is no
// meaningful recovery for a local store, so lock() panics propagate.
#![allow(clippy::missing_panics_doc)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::entry::LedgerEntry;
use crate::crypto::kdf::KeyDeriver;
use crate::error::StoreError;
use crate::passphrase::Passphrase;

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL,
    sale_json TEXT NOT NULL,
    previous_hash TEXT NOT NULL,
    current_hash TEXT NOT NULL,
    signature TEXT NOT NULL,
    key_id TEXT NOT NULL,
    checkpoint INTEGER NOT NULL DEFAULT 0
)";

const ENTRY_COLUMNS: &str =
    "id, created_at, sale_json, previous_hash, current_hash, signature, key_id, checkpoint";

const KEYING_SALT_FILENAME: &str = "db_key.json";
const KEYING_SALT_VERSION: u32 = 1;
const KEYING_SALT_LEN: usize = 16;

/// Whether the linked `SQLite` build can encrypt pages at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherCapability {
    /// A page cipher is present.
    Available {
        /// Cipher version string reported by the build.
        version: String,
    },
    /// Plain `SQLite`: integrity protection only, no on-disk
    /// confidentiality.
    Unavailable,
}

impl CipherCapability {
    /// `true` when a page cipher is present.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// Fields of a row about to be appended.
///
/// `id` is assigned by storage and `checkpoint` is always written `false`
/// in the base flow, so neither appears here.
#[derive(Debug, Clone, Copy)]
pub struct NewEntry<'a> {
    /// Insertion time, epoch seconds.
    pub created_at: i64,
    /// Opaque sale payload.
    pub payload: &'a str,
    /// Hash of the predecessor entry (or the genesis hash).
    pub previous_hash: &'a str,
    /// Hash of this entry.
    pub current_hash: &'a str,
    /// Signature over `current_hash`.
    pub signature: &'a str,
    /// Signing identity.
    pub key_id: &'a str,
}

/// Handle for mutations inside one append transaction.
///
/// Obtained through [`LedgerStore::with_append_txn`]; the transaction
/// commits only when the closure returns `Ok` and rolls back on every
/// other exit path.
pub struct AppendTxn<'conn> {
    tx: &'conn Transaction<'conn>,
}

impl AppendTxn<'_> {
    /// Reads the chain tail's `current_hash`, or `None` on an empty ledger.
    ///
    /// Runs inside the append transaction, so it is serialized against any
    /// concurrent append: two appends can never observe the same tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn tail_hash(&self) -> Result<Option<String>, StoreError> {
        let hash = self
            .tx
            .query_row(
                "SELECT current_hash FROM ledger ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Inserts the new row and returns its assigned id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert(&self, entry: &NewEntry<'_>) -> Result<i64, StoreError> {
        self.tx.execute(
            "INSERT INTO ledger (created_at, sale_json, previous_hash, current_hash, signature, key_id, checkpoint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            rusqlite::params![
                entry.created_at,
                entry.payload,
                entry.previous_hash,
                entry.current_hash,
                entry.signature,
                entry.key_id,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }
}

/// The ledger's backing store.
///
/// All access is serialized behind a connection mutex; reads outside a
/// transaction therefore always see a committed, point-in-time view.
#[derive(Debug)]
pub struct LedgerStore {
    conn: Mutex<Connection>,
    cipher: CipherCapability,
}

impl LedgerStore {
    /// Opens (or creates) the ledger database at `path` and bootstraps the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = open_connection(path)?;
        let cipher = probe_cipher(&conn);
        Self::finish(conn, cipher)
    }

    /// Opens an in-memory ledger, for tests and ephemeral use.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let cipher = probe_cipher(&conn);
        Self::finish(conn, cipher)
    }

    /// Opens the ledger with at-rest encryption keyed from `passphrase`.
    ///
    /// The keying salt is persisted next to the database
    /// (`db_key.json`, created atomically on first use) so the same
    /// passphrase rekeys the same pages on every open.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::CipherUnavailable`] when the linked
    /// `SQLite` build carries no page cipher — an explicit refusal rather
    /// than a silent downgrade to plaintext. Also fails on I/O, derivation,
    /// or database errors, including a wrong passphrase (the keyed probe
    /// read rejects it).
    pub fn open_encrypted(
        path: &Path,
        passphrase: &Passphrase,
        deriver: &KeyDeriver,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = open_connection(path)?;
        let cipher = probe_cipher(&conn);
        if !cipher.is_available() {
            return Err(StoreError::CipherUnavailable);
        }

        let salt = load_or_create_keying_salt(path)?;
        let key = deriver.derive(passphrase, &salt)?;
        let key_hex = Zeroizing::new(hex::encode(key.as_bytes()));
        let pragma = Zeroizing::new(format!("PRAGMA key = \"x'{}'\";", key_hex.as_str()));
        conn.execute_batch(&pragma)?;
        // Touch a page so a wrong key fails here with a clear error instead
        // of a confusing "not a database" during schema bootstrap.
        conn.query_row("SELECT count(*) FROM sqlite_master;", [], |row| {
            row.get::<_, i64>(0)
        })?;

        Self::finish(conn, cipher)
    }

    fn finish(conn: Connection, cipher: CipherCapability) -> Result<Self, StoreError> {
        configure_connection(&conn)?;
        conn.execute_batch(LEDGER_DDL)?;
        match &cipher {
            CipherCapability::Available { version } => {
                log::info!("ledger store: at-rest encryption available (cipher {version})");
            }
            CipherCapability::Unavailable => {
                log::info!(
                    "ledger store: no page cipher in this build; \
                     entries are integrity-protected but payloads are plaintext on disk"
                );
            }
        }
        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// The at-rest encryption capability detected at bootstrap.
    #[must_use]
    pub const fn cipher_capability(&self) -> &CipherCapability {
        &self.cipher
    }

    /// Runs `f` inside an IMMEDIATE transaction with append access.
    ///
    /// The transaction commits only if `f` returns `Ok`; any error (or
    /// panic) rolls it back, so no partial row is ever visible. `f` may use
    /// its own error type as long as store errors convert into it.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or a database error from begin/commit.
    pub fn with_append_txn<T, E>(
        &self,
        f: impl FnOnce(&AppendTxn<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| E::from(StoreError::from(err)))?;
        let value = f(&AppendTxn { tx: &tx })?;
        tx.commit().map_err(|err| E::from(StoreError::from(err)))?;
        Ok(value)
    }

    /// Reads the whole ledger ascending by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger ORDER BY id ASC"
        ))?;
        let entries = stmt
            .query_map([], map_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Reads the last entry, or `None` on an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn tail(&self) -> Result<Option<LedgerEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger ORDER BY id DESC LIMIT 1"),
                [],
                map_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Runs `PRAGMA integrity_check` and reports whether the database is
    /// healthy.
    ///
    /// # Errors
    ///
    /// Returns an error if the pragma fails.
    pub fn integrity_check(&self) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let result: String = conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0))?;
        Ok(result.trim() == "ok")
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, sql: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(sql, [])?)
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    Ok(Connection::open_with_flags(path, flags)?)
}

/// Configures durable WAL settings.
fn configure_connection(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;",
    )?;
    Ok(())
}

/// Asks the build whether a page cipher is linked in.
///
/// Plain `SQLite` returns no row for `PRAGMA cipher_version`; cipher-capable
/// builds report a non-empty version string.
fn probe_cipher(conn: &Connection) -> CipherCapability {
    match conn.query_row("PRAGMA cipher_version;", [], |row| row.get::<_, String>(0)) {
        Ok(version) if !version.trim().is_empty() => CipherCapability::Available { version },
        Ok(_) | Err(_) => CipherCapability::Unavailable,
    }
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        created_at: row.get(1)?,
        payload: row.get(2)?,
        previous_hash: row.get(3)?,
        current_hash: row.get(4)?,
        signature: row.get(5)?,
        key_id: row.get(6)?,
        checkpoint: row.get::<_, i64>(7)? != 0,
    })
}

#[derive(Serialize, Deserialize)]
struct KeyingSalt {
    version: u32,
    salt: String,
}

/// Loads the persisted keying salt next to the database, creating it on
/// first use with a durable atomic write.
fn load_or_create_keying_salt(db_path: &Path) -> Result<Vec<u8>, StoreError> {
    let salt_path = keying_salt_path(db_path);
    if salt_path.exists() {
        let bytes = fs::read(&salt_path)?;
        let record: KeyingSalt = serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        if record.version != KEYING_SALT_VERSION {
            return Err(StoreError::Serialization(format!(
                "unsupported keying salt version: {}",
                record.version
            )));
        }
        return BASE64
            .decode(&record.salt)
            .map_err(|err| StoreError::Serialization(format!("bad base64 in keying salt: {err}")));
    }

    let mut salt = [0u8; KEYING_SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let record = KeyingSalt {
        version: KEYING_SALT_VERSION,
        salt: BASE64.encode(salt),
    };
    let bytes = serde_json::to_vec_pretty(&record)
        .map_err(|err| StoreError::Serialization(err.to_string()))?;

    let tmp = salt_path.with_extension("json.tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, &salt_path)?;

    Ok(salt.to_vec())
}

fn keying_salt_path(db_path: &Path) -> PathBuf {
    db_path.parent().map_or_else(
        || PathBuf::from(KEYING_SALT_FILENAME),
        |parent| parent.join(KEYING_SALT_FILENAME),
    )
}
