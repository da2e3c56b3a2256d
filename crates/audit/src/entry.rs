use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// `prev_hash` of the first entry: 64 zero characters.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// One immutable, hash-chained record of a state-affecting action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonically increasing sequence number, starting at 0.
    pub seq: u64,
    /// Short action name, e.g. `status_changed`.
    pub action: String,
    /// Entity type this entry concerns, e.g. `bridge_order`.
    pub entity_type: String,
    pub entity_id: Option<String>,
    /// `system` or an identified operator.
    pub actor: String,
    /// Structured detail payload.
    pub details: serde_json::Value,
    /// `content_hash` of the immediately preceding entry, or the genesis
    /// sentinel for the first entry.
    pub prev_hash: String,
    /// SHA-256 over this entry's canonical fields plus `prev_hash`.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Recompute what this entry's `content_hash` should be from its own
    /// fields. Used both at append time and during verification.
    pub fn compute_content_hash(&self) -> String {
        hash_fields(
            self.seq,
            &self.action,
            &self.entity_type,
            self.entity_id.as_deref(),
            &self.actor,
            &self.details,
            self.created_at,
            &self.prev_hash,
        )
    }
}

/// Canonical serialization: fixed field order, compact JSON for the detail
/// payload, RFC 3339 timestamp. The `|` separators keep adjacent fields
/// from gluing together into the same preimage.
#[allow(clippy::too_many_arguments)]
pub(crate) fn hash_fields(
    seq: u64,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    actor: &str,
    details: &serde_json::Value,
    created_at: DateTime<Utc>,
    prev_hash: &str,
) -> String {
    let details_json = details.to_string();
    let content = format!(
        "{seq}|{action}|{entity_type}|{id}|{actor}|{details_json}|{ts}|{prev_hash}",
        id = entity_id.unwrap_or(""),
        ts = created_at.to_rfc3339(),
    );

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
