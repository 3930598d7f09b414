//! Ledger row types and verification diagnostics.

use thiserror::Error;

/// One committed row of the hash-chain ledger.
///
/// Append-only: no update or delete operation exists anywhere in the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Chain position, assigned by storage.
    pub id: i64,
    /// Insertion time, epoch seconds.
    pub created_at: i64,
    /// Opaque sale payload. The core never parses it.
    pub payload: String,
    /// Base64 digest linking to the predecessor (genesis hash for the
    /// first entry).
    pub previous_hash: String,
    /// Base64 digest of `previous_hash ++ payload`.
    pub current_hash: String,
    /// Base64 signature over `current_hash`.
    pub signature: String,
    /// Signing identity used for this entry.
    pub key_id: String,
    /// Reserved compaction marker; always `false` in the base flow.
    pub checkpoint: bool,
}

/// A single content fault found while verifying the chain.
///
/// These are forensic diagnostics, not errors: the scan keeps going after
/// each one. The `Display` form is the operator-facing diagnostic string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainFault {
    /// The entry does not link to its predecessor's recorded hash.
    #[error("previous-hash mismatch at id={id}")]
    PreviousHashMismatch {
        /// Entry where the link breaks.
        id: i64,
    },

    /// Recomputing the entry's hash from its stored fields disagrees with
    /// the recorded value.
    #[error("hash mismatch at id={id}")]
    HashMismatch {
        /// Entry whose content was altered.
        id: i64,
    },

    /// The recorded signature does not verify over the recorded hash.
    #[error("invalid signature at id={id}")]
    InvalidSignature {
        /// Entry whose signature fails.
        id: i64,
    },
}

/// Outcome of a full-chain verification scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    faults: Vec<ChainFault>,
}

impl VerificationResult {
    /// `true` iff the scan produced no diagnostics.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.faults.is_empty()
    }

    /// The diagnostics, in scan order.
    #[must_use]
    pub fn faults(&self) -> &[ChainFault] {
        &self.faults
    }

    /// The diagnostics rendered as operator-facing strings, in scan order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.faults.iter().map(ToString::to_string).collect()
    }

    pub(crate) fn push(&mut self, fault: ChainFault) {
        self.faults.push(fault);
    }
}
