//! Threshold-signature coordination (FROST, Schnorr over secp256k1).
//!
//! One signing session per withdrawal: a commitment round collects
//! single-use nonce commitments from the signer set, a signing round
//! collects partial signature shares over one agreed signing package, and
//! aggregation produces a group signature that is verified against the
//! group public key before it is ever surfaced.
//!
//! Nonce hygiene is the hard invariant here: a nonce committed for one
//! transaction hash must never sign another, and an aborted session's
//! nonces are discarded, never replayed. Signers enforce this locally by
//! consuming nonces by value; the coordinator enforces it by never carrying
//! commitments across sessions.

pub mod ceremony;
pub mod coordinator;
pub mod signer;

pub use ceremony::{CeremonyOutput, TrustedDealer};
pub use coordinator::{SigningConfig, SigningCoordinator};
pub use signer::{LocalSigner, SignerClient};

use bridge_types::OrderId;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("no completed key ceremony for chain {0}")]
    CeremonyMissing(bridge_types::Chain),

    #[error("stored key material for chain {0} cannot be decoded")]
    KeyMaterialInvalid(bridge_types::Chain),

    #[error("a signing session is already active for order {0}")]
    SessionActive(OrderId),

    #[error("quorum not reached: {got} of {need} signers responded")]
    QuorumNotReached { got: usize, need: usize },

    #[error("signer {signer} has no nonces for session {session} (already used or aborted)")]
    NoncesConsumed { signer: u16, session: uuid::Uuid },

    #[error("signer {signer} already committed for session {session}")]
    AlreadyCommitted { signer: u16, session: uuid::Uuid },

    #[error("aggregated signature failed verification against the group public key")]
    VerificationFailed,

    #[error("signing round timed out: {0}")]
    Timeout(String),

    #[error("frost protocol error: {0}")]
    Frost(#[from] frost_secp256k1::Error),

    #[error(transparent)]
    Storage(#[from] bridge_storage::StorageError),

    #[error(transparent)]
    Audit(#[from] bridge_audit::AuditError),
}

pub type Result<T> = std::result::Result<T, SigningError>;

/// Hex-encoded SHA-256 digest of the exact transaction bytes to be signed.
pub fn tx_data_hash(tx_data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(tx_data))
}
