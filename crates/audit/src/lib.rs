//! Append-only, tamper-evident audit log.
//!
//! Every state-affecting action in the bridge produces exactly one entry
//! here, written before the corresponding external side effect so the log
//! captures intent even if the side effect later fails. Entries are linked
//! by content hash: each entry's `content_hash` covers its canonical fields
//! plus the previous entry's `content_hash`, so any retroactive edit
//! invalidates every subsequent entry.
//!
//! Appends are strictly serialized (one global ordering); concurrent
//! appends queue on the internal mutex rather than running in parallel.

mod chain;
mod entry;

pub use chain::{AuditChain, Verification};
pub use entry::{AuditEntry, GENESIS_PREV_HASH};

/// Audit log errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The chain failed verification at some point in the past. Further
    /// writes are refused until an operator investigates; the log's
    /// guarantee is void once broken.
    #[error("audit chain integrity violated at sequence {0}; writes halted")]
    IntegrityViolation(u64),

    #[error("invalid verification range: {start}..{end} (chain length {len})")]
    InvalidRange { start: u64, end: u64, len: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
