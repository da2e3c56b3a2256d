use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::Chain;
use crate::order::OrderId;

/// Signing session status as persisted on the signature-request row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    /// Created, commitment round not yet started.
    Pending,
    /// Collecting commitments / signature shares.
    Collecting,
    /// Aggregated signature produced and verified.
    Completed,
    /// Timed out, cancelled, or failed verification.
    Failed,
}

impl SignatureStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Collecting)
    }
}

/// One threshold-signing session tied to exactly one order.
///
/// Never reused across two different `tx_data_hash` values; a retry after a
/// failed session is a brand-new request with fresh nonces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub id: Uuid,
    pub order_id: OrderId,
    pub chain: Chain,
    /// SHA-256 hex digest of the exact transaction bytes being signed.
    pub tx_data_hash: String,
    pub shares_received: u16,
    pub shares_required: u16,
    pub status: SignatureStatus,
    /// Set only after verifying against the group public key and
    /// `tx_data_hash`.
    pub final_signature: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Key ceremony status. Read-only after the single completion transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyStatus {
    Pending,
    Completed,
}

/// Long-lived group key material record, one per (chain, signer set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCeremonyRecord {
    pub id: Uuid,
    pub chain: Chain,
    pub threshold: u16,
    pub total_signers: u16,
    /// Hex-encoded group verifying key, set on completion.
    pub group_public_key: Option<String>,
    /// Hex-encoded serialized public key package (group key plus the
    /// per-signer verifying shares needed to aggregate).
    pub public_key_package: Option<String>,
    /// How the key material was established (e.g. `trusted_dealer`).
    pub kind: String,
    pub status: CeremonyStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
