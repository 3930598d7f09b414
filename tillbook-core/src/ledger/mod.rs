//! Append-only, hash-chained, signed sale ledger.
//!
//! # Append-only semantics
//!
//! Entries can only be added, never modified or deleted. Any retroactive
//! edit to a committed row breaks the recomputed hash of that entry and the
//! predecessor link of the next, which [`LedgerEngine::verify_chain`]
//! reports per entry.

pub mod engine;
pub mod entry;
pub mod store;

pub use engine::LedgerEngine;
pub use entry::{ChainFault, LedgerEntry, VerificationResult};
pub use store::{AppendTxn, CipherCapability, LedgerStore, NewEntry};
