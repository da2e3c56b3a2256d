use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::entry::{hash_fields, AuditEntry, GENESIS_PREV_HASH};
use crate::{AuditError, Result};

/// Outcome of verifying a range of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    /// Sequence number of the first entry whose stored `content_hash` does
    /// not match recomputation, or whose `prev_hash` does not match its
    /// predecessor.
    FirstInvalid(u64),
}

/// Arena-style append-only hash chain.
///
/// Entries are indexed by sequence number; `prev_hash` is a content
/// reference, not an ownership pointer. The mutex serializes all appends
/// into a single global ordering. A failed verification latches the chain
/// halted: once tamper evidence exists, accepting further writes would only
/// bury it.
pub struct AuditChain {
    entries: Mutex<Vec<AuditEntry>>,
    halted: AtomicBool,
    first_invalid: AtomicU64,
}

impl AuditChain {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            halted: AtomicBool::new(false),
            first_invalid: AtomicU64::new(0),
        }
    }

    /// Rehydrate a chain from previously persisted entries, verifying the
    /// whole range before accepting it.
    pub async fn from_entries(entries: Vec<AuditEntry>) -> Result<Self> {
        if let Verification::FirstInvalid(seq) = Self::verify_entries(&entries) {
            return Err(AuditError::IntegrityViolation(seq));
        }
        Ok(Self {
            entries: Mutex::new(entries),
            halted: AtomicBool::new(false),
            first_invalid: AtomicU64::new(0),
        })
    }

    /// Append one entry. Returns the fully-hashed entry as written.
    pub async fn append(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: Option<&str>,
        actor: &str,
        details: serde_json::Value,
    ) -> Result<AuditEntry> {
        if self.halted.load(Ordering::Acquire) {
            return Err(AuditError::IntegrityViolation(
                self.first_invalid.load(Ordering::Acquire),
            ));
        }

        let mut entries = self.entries.lock().await;

        let seq = entries.len() as u64;
        let prev_hash = entries
            .last()
            .map(|e| e.content_hash.clone())
            .unwrap_or_else(|| GENESIS_PREV_HASH.to_string());

        let created_at = Utc::now();
        let content_hash = hash_fields(
            seq,
            action,
            entity_type,
            entity_id,
            actor,
            &details,
            created_at,
            &prev_hash,
        );

        let entry = AuditEntry {
            seq,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.map(str::to_string),
            actor: actor.to_string(),
            details,
            prev_hash,
            content_hash,
            created_at,
        };

        entries.push(entry.clone());

        info!(
            seq = seq,
            action = action,
            entity = entity_type,
            entity_id = entity_id.unwrap_or(""),
            "audit entry appended"
        );

        Ok(entry)
    }

    /// Number of entries in the chain.
    pub async fn len(&self) -> u64 {
        self.entries.lock().await.len() as u64
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Snapshot of all entries, for export or independent verification.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Verify a sequence-number range of the chain (half-open).
    ///
    /// Recomputes `content_hash` for every entry in the range and checks
    /// each entry's `prev_hash` against its predecessor. A mismatch halts
    /// further appends; this is a fatal integrity alarm, not a recoverable
    /// error.
    pub async fn verify(&self, range: Range<u64>) -> Result<Verification> {
        let entries = self.entries.lock().await;
        let len = entries.len() as u64;
        if range.start > range.end || range.end > len {
            return Err(AuditError::InvalidRange {
                start: range.start,
                end: range.end,
                len,
            });
        }

        let result = Self::verify_slice(&entries, range);
        if let Verification::FirstInvalid(seq) = result {
            error!(seq = seq, "audit chain integrity violation; halting writes");
            self.first_invalid.store(seq, Ordering::Release);
            self.halted.store(true, Ordering::Release);
        }
        Ok(result)
    }

    /// Verify the whole chain.
    pub async fn verify_all(&self) -> Result<Verification> {
        let end = self.len().await;
        self.verify(0..end).await
    }

    /// Whether the chain has been halted by a detected integrity violation.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Stateless verification over exported entries. Runnable independently
    /// of any writer (nightly job, operator tooling).
    pub fn verify_entries(entries: &[AuditEntry]) -> Verification {
        Self::verify_slice(entries, 0..entries.len() as u64)
    }

    fn verify_slice(entries: &[AuditEntry], range: Range<u64>) -> Verification {
        for seq in range {
            let entry = &entries[seq as usize];

            if entry.seq != seq {
                return Verification::FirstInvalid(seq);
            }

            let expected_prev = if seq == 0 {
                GENESIS_PREV_HASH
            } else {
                entries[seq as usize - 1].content_hash.as_str()
            };
            if entry.prev_hash != expected_prev {
                return Verification::FirstInvalid(seq);
            }

            if entry.compute_content_hash() != entry.content_hash {
                return Verification::FirstInvalid(seq);
            }
        }
        Verification::Valid
    }
}

impl Default for AuditChain {
    fn default() -> Self {
        Self::new()
    }
}
