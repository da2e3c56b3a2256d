//! Signer participants.
//!
//! Each signer holds one key share and a per-session nonce store. Nonces
//! are generated at commitment time and consumed by value when the
//! signature share is produced (or when the session aborts), so a nonce can
//! never be used for two different signing packages.

use std::collections::HashMap;

use async_trait::async_trait;
use frost_secp256k1 as frost;
use frost::keys::KeyPackage;
use frost::round1::{SigningCommitments, SigningNonces};
use frost::round2::SignatureShare;
use frost::SigningPackage;
use rand::thread_rng;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{Result, SigningError};

/// Protocol role of one signer, as seen by the coordinator.
///
/// The coordinator only ever talks to signers through this trait, so tests
/// can swap in misbehaving implementations and a future deployment can put
/// a network transport behind it.
#[async_trait]
pub trait SignerClient: Send + Sync {
    /// 1-based signer index; doubles as the FROST identifier.
    fn index(&self) -> u16;

    /// Commitment round: produce a single-use nonce commitment pair for
    /// this session.
    async fn commit(&self, session: Uuid) -> Result<SigningCommitments>;

    /// Signing round: produce a partial signature share over the agreed
    /// signing package, consuming the session's nonces.
    async fn produce_share(
        &self,
        session: Uuid,
        package: &SigningPackage,
    ) -> Result<SignatureShare>;

    /// Discard any nonces held for this session. Idempotent.
    async fn abort(&self, session: Uuid);
}

/// In-process signer holding its FROST key package.
pub struct LocalSigner {
    index: u16,
    key_package: KeyPackage,
    nonces: Mutex<HashMap<Uuid, SigningNonces>>,
}

impl LocalSigner {
    pub fn new(index: u16, key_package: KeyPackage) -> Self {
        Self {
            index,
            key_package,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Number of sessions with outstanding (committed but unused) nonces.
    pub async fn outstanding_nonces(&self) -> usize {
        self.nonces.lock().await.len()
    }
}

#[async_trait]
impl SignerClient for LocalSigner {
    fn index(&self) -> u16 {
        self.index
    }

    async fn commit(&self, session: Uuid) -> Result<SigningCommitments> {
        let mut nonces = self.nonces.lock().await;
        if nonces.contains_key(&session) {
            return Err(SigningError::AlreadyCommitted {
                signer: self.index,
                session,
            });
        }

        let (session_nonces, commitments) =
            frost::round1::commit(self.key_package.signing_share(), &mut thread_rng());
        nonces.insert(session, session_nonces);

        debug!(signer = self.index, session = %session, "nonce commitment produced");
        Ok(commitments)
    }

    async fn produce_share(
        &self,
        session: Uuid,
        package: &SigningPackage,
    ) -> Result<SignatureShare> {
        // Remove, not get: the nonces leave the store before signing so a
        // repeated call for the same session cannot sign twice.
        let session_nonces = self
            .nonces
            .lock()
            .await
            .remove(&session)
            .ok_or(SigningError::NoncesConsumed {
                signer: self.index,
                session,
            })?;

        let share = frost::round2::sign(package, &session_nonces, &self.key_package)?;

        debug!(signer = self.index, session = %session, "signature share produced");
        Ok(share)
    }

    async fn abort(&self, session: Uuid) {
        if self.nonces.lock().await.remove(&session).is_some() {
            debug!(signer = self.index, session = %session, "session nonces discarded");
        }
    }
}
