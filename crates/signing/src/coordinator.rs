//! Signing session coordinator.
//!
//! Drives the two FROST rounds against a set of [`SignerClient`]s and
//! persists session progress as a [`SignatureRequest`] row, with one audit
//! entry per row state change. Key material is resolved per destination
//! chain from the persisted ceremony record. At most one active session per
//! order, enforced both in memory and against the store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use frost_secp256k1 as frost;
use frost::keys::PublicKeyPackage;
use frost::round1::SigningCommitments;
use frost::round2::SignatureShare;
use frost::{Identifier, SigningPackage};
use futures::future::join_all;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use bridge_audit::AuditChain;
use bridge_storage::BridgeStore;
use bridge_types::{CeremonyStatus, Chain, OrderId, SignatureRequest, SignatureStatus};

use crate::signer::SignerClient;
use crate::{tx_data_hash, Result, SigningError};

#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// Signature shares needed to aggregate (the threshold `t`).
    pub shares_required: u16,
    /// Per-signer wait for a nonce commitment.
    pub commit_timeout: Duration,
    /// Per-signer wait for a signature share.
    pub share_timeout: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            shares_required: 2,
            commit_timeout: Duration::from_secs(10),
            share_timeout: Duration::from_secs(10),
        }
    }
}

/// Coordinates one signing session at a time per order.
pub struct SigningCoordinator {
    store: Arc<dyn BridgeStore>,
    audit: Arc<AuditChain>,
    signers: Vec<Arc<dyn SignerClient>>,
    config: SigningConfig,
    active: Mutex<HashSet<OrderId>>,
}

impl SigningCoordinator {
    pub fn new(
        store: Arc<dyn BridgeStore>,
        audit: Arc<AuditChain>,
        signers: Vec<Arc<dyn SignerClient>>,
        config: SigningConfig,
    ) -> Self {
        Self {
            store,
            audit,
            signers,
            config,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Run a full signing session for one withdrawal transaction.
    ///
    /// Returns the completed request with `final_signature` set, already
    /// verified against the group public key of the chain's ceremony. Any
    /// failure marks the persisted request as failed and discards every
    /// nonce committed for the session before the error is returned.
    pub async fn request_signature(
        &self,
        order_id: &OrderId,
        chain: Chain,
        tx_data: &[u8],
    ) -> Result<SignatureRequest> {
        {
            let mut active = self.active.lock().await;
            if active.contains(order_id) {
                return Err(SigningError::SessionActive(order_id.clone()));
            }
            if self.store.active_signature_request(order_id).await?.is_some() {
                return Err(SigningError::SessionActive(order_id.clone()));
            }
            active.insert(order_id.clone());
        }

        let result = self.run_session(order_id, chain, tx_data).await;
        self.active.lock().await.remove(order_id);
        result
    }

    /// Group key material for `chain`, from its completed ceremony record.
    async fn group_key(&self, chain: Chain) -> Result<PublicKeyPackage> {
        let record = self
            .store
            .fetch_ceremony(chain)
            .await?
            .filter(|r| r.status == CeremonyStatus::Completed)
            .ok_or(SigningError::CeremonyMissing(chain))?;
        let encoded = record
            .public_key_package
            .ok_or(SigningError::CeremonyMissing(chain))?;
        let bytes =
            hex::decode(&encoded).map_err(|_| SigningError::KeyMaterialInvalid(chain))?;
        Ok(PublicKeyPackage::deserialize(&bytes)?)
    }

    async fn run_session(
        &self,
        order_id: &OrderId,
        chain: Chain,
        tx_data: &[u8],
    ) -> Result<SignatureRequest> {
        let pubkeys = self.group_key(chain).await?;

        let session = Uuid::new_v4();
        let session_id = session.to_string();
        let mut request = SignatureRequest {
            id: session,
            order_id: order_id.clone(),
            chain,
            tx_data_hash: tx_data_hash(tx_data),
            shares_received: 0,
            shares_required: self.config.shares_required,
            status: SignatureStatus::Pending,
            final_signature: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.audit
            .append(
                "signing_session_opened",
                "signature_request",
                Some(&session_id),
                "coordinator",
                json!({
                    "order_id": order_id.as_str(),
                    "chain": chain.as_str(),
                    "tx_data_hash": request.tx_data_hash,
                }),
            )
            .await?;
        self.store.insert_signature_request(&request).await?;

        request.status = SignatureStatus::Collecting;
        self.audit
            .append(
                "signing_collection_started",
                "signature_request",
                Some(&session_id),
                "coordinator",
                json!({ "shares_required": request.shares_required }),
            )
            .await?;
        self.store.update_signature_request(&request).await?;
        info!(order_id = %order_id, session = %session, %chain, "signing session started");

        match self.sign(&mut request, tx_data, &pubkeys).await {
            Ok(signature) => {
                request.final_signature = Some(signature);
                request.status = SignatureStatus::Completed;
                request.completed_at = Some(Utc::now());
                self.audit
                    .append(
                        "signing_session_completed",
                        "signature_request",
                        Some(&session_id),
                        "coordinator",
                        json!({ "shares_received": request.shares_received }),
                    )
                    .await?;
                self.store.update_signature_request(&request).await?;
                info!(order_id = %order_id, session = %session, "signing session completed");
                Ok(request)
            }
            Err(err) => {
                // Every committed nonce must die with the session.
                self.abort_all(session).await;
                request.status = SignatureStatus::Failed;
                request.completed_at = Some(Utc::now());
                self.audit
                    .append(
                        "signing_session_failed",
                        "signature_request",
                        Some(&session_id),
                        "coordinator",
                        json!({
                            "error": err.to_string(),
                            "shares_received": request.shares_received,
                        }),
                    )
                    .await?;
                self.store.update_signature_request(&request).await?;
                warn!(order_id = %order_id, session = %session, error = %err, "signing session failed");
                Err(err)
            }
        }
    }

    /// Both protocol rounds plus aggregation and verification. Share
    /// arrivals are persisted onto the request row as collection progress.
    async fn sign(
        &self,
        request: &mut SignatureRequest,
        tx_data: &[u8],
        pubkeys: &PublicKeyPackage,
    ) -> Result<Vec<u8>> {
        let session = request.id;
        let need = self.config.shares_required as usize;

        // Round 1: collect nonce commitments from every reachable signer.
        let commit_futures = self.signers.iter().map(|signer| {
            let signer = Arc::clone(signer);
            async move {
                let outcome = timeout(self.config.commit_timeout, signer.commit(session)).await;
                (signer, outcome)
            }
        });

        let mut responders: Vec<(Arc<dyn SignerClient>, SigningCommitments)> = Vec::new();
        for (signer, outcome) in join_all(commit_futures).await {
            match outcome {
                Ok(Ok(commitments)) => responders.push((signer, commitments)),
                Ok(Err(err)) => {
                    warn!(signer = signer.index(), session = %session, error = %err,
                        "signer failed commitment round");
                }
                Err(_) => {
                    warn!(signer = signer.index(), session = %session,
                        "signer timed out in commitment round");
                }
            }
        }

        if responders.len() < need {
            return Err(SigningError::QuorumNotReached {
                got: responders.len(),
                need,
            });
        }

        // Deterministic participant selection: lowest signer indices win.
        // Non-selected responders are told to drop their nonces.
        responders.sort_by_key(|(signer, _)| signer.index());
        for (signer, _) in responders.split_off(need) {
            signer.abort(session).await;
        }

        let mut commitments: BTreeMap<Identifier, SigningCommitments> = BTreeMap::new();
        for (signer, commitment) in &responders {
            commitments.insert(Identifier::try_from(signer.index())?, commitment.clone());
        }
        let package = SigningPackage::new(commitments, tx_data);

        // Round 2: one signing package, one share per selected signer. A
        // missing share here is fatal for the session since the quorum was
        // already fixed.
        let share_futures = responders.iter().map(|(signer, _)| {
            let signer = Arc::clone(signer);
            let package = package.clone();
            async move {
                let outcome =
                    timeout(self.config.share_timeout, signer.produce_share(session, &package))
                        .await;
                (signer, outcome)
            }
        });

        let mut shares: BTreeMap<Identifier, SignatureShare> = BTreeMap::new();
        for (signer, outcome) in join_all(share_futures).await {
            match outcome {
                Ok(Ok(share)) => {
                    shares.insert(Identifier::try_from(signer.index())?, share);
                    request.shares_received = shares.len() as u16;
                    self.store.update_signature_request(request).await?;
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(SigningError::Timeout(format!(
                        "signer {} did not return a signature share",
                        signer.index()
                    )))
                }
            }
        }

        let group_signature = frost::aggregate(&package, &shares, pubkeys)?;
        pubkeys
            .verifying_key()
            .verify(tx_data, &group_signature)
            .map_err(|_| SigningError::VerificationFailed)?;

        Ok(group_signature.serialize()?)
    }

    async fn abort_all(&self, session: Uuid) {
        for signer in &self.signers {
            signer.abort(session).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceremony::TrustedDealer;
    use crate::signer::LocalSigner;
    use async_trait::async_trait;
    use bridge_storage::MemoryStore;
    use bridge_types::Chain;

    struct DeadSigner {
        index: u16,
    }

    #[async_trait]
    impl SignerClient for DeadSigner {
        fn index(&self) -> u16 {
            self.index
        }

        async fn commit(&self, _session: Uuid) -> Result<SigningCommitments> {
            Err(SigningError::Timeout("signer offline".into()))
        }

        async fn produce_share(
            &self,
            session: Uuid,
            _package: &SigningPackage,
        ) -> Result<SignatureShare> {
            Err(SigningError::NoncesConsumed {
                signer: self.index,
                session,
            })
        }

        async fn abort(&self, _session: Uuid) {}
    }

    /// Commits normally, then loses its share round.
    struct ShareLossSigner {
        inner: LocalSigner,
    }

    #[async_trait]
    impl SignerClient for ShareLossSigner {
        fn index(&self) -> u16 {
            self.inner.index()
        }

        async fn commit(&self, session: Uuid) -> Result<SigningCommitments> {
            self.inner.commit(session).await
        }

        async fn produce_share(
            &self,
            session: Uuid,
            _package: &SigningPackage,
        ) -> Result<SignatureShare> {
            self.inner.abort(session).await;
            Err(SigningError::Timeout("share lost".into()))
        }

        async fn abort(&self, session: Uuid) {
            self.inner.abort(session).await
        }
    }

    struct Parts {
        signers: Vec<Arc<LocalSigner>>,
        pubkeys: PublicKeyPackage,
        store: Arc<MemoryStore>,
        audit: Arc<AuditChain>,
    }

    async fn parts_for(chain: Chain) -> Parts {
        let output = TrustedDealer::run(2, 3).unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .insert_ceremony(&TrustedDealer::record(chain, 2, 3, &output))
            .await
            .unwrap();
        Parts {
            pubkeys: output.public_key_package.clone(),
            signers: output
                .key_packages
                .into_iter()
                .map(|(index, kp)| Arc::new(LocalSigner::new(index, kp)))
                .collect(),
            store,
            audit: Arc::new(AuditChain::new()),
        }
    }

    fn coordinator_with(parts: &Parts, clients: Vec<Arc<dyn SignerClient>>) -> SigningCoordinator {
        SigningCoordinator::new(
            Arc::clone(&parts.store) as Arc<dyn BridgeStore>,
            Arc::clone(&parts.audit),
            clients,
            SigningConfig::default(),
        )
    }

    async fn session_actions(audit: &AuditChain) -> Vec<String> {
        audit
            .entries()
            .await
            .into_iter()
            .filter(|e| e.entity_type == "signature_request")
            .map(|e| e.action)
            .collect()
    }

    #[tokio::test]
    async fn two_of_three_signature_verifies() {
        let parts = parts_for(Chain::Ton).await;
        let clients: Vec<Arc<dyn SignerClient>> = parts
            .signers
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn SignerClient>)
            .collect();
        let coordinator = coordinator_with(&parts, clients);

        let order_id = bridge_types::OrderId::generate();
        let tx_data = b"withdraw 0.997 TON";
        let request = coordinator
            .request_signature(&order_id, Chain::Ton, tx_data)
            .await
            .unwrap();

        assert_eq!(request.status, SignatureStatus::Completed);
        assert_eq!(request.shares_received, 2);
        assert_eq!(request.tx_data_hash, tx_data_hash(tx_data));
        let signature =
            frost::Signature::deserialize(&request.final_signature.unwrap()).unwrap();
        parts.pubkeys.verifying_key().verify(tx_data, &signature).unwrap();

        // The persisted row matches, every row state change is audited, and
        // no nonces leak past the session.
        let stored = parts.store.fetch_signature_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignatureStatus::Completed);
        assert_eq!(
            session_actions(&parts.audit).await,
            vec![
                "signing_session_opened",
                "signing_collection_started",
                "signing_session_completed",
            ]
        );
        for signer in &parts.signers {
            assert_eq!(signer.outstanding_nonces().await, 0);
        }
    }

    #[tokio::test]
    async fn missing_ceremony_fails_before_any_round() {
        let parts = parts_for(Chain::Ton).await;
        let clients: Vec<Arc<dyn SignerClient>> = parts
            .signers
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn SignerClient>)
            .collect();
        let coordinator = coordinator_with(&parts, clients);

        // No ceremony was ever run for BTC.
        let order_id = bridge_types::OrderId::generate();
        let err = coordinator
            .request_signature(&order_id, Chain::Btc, b"tx")
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::CeremonyMissing(Chain::Btc)));

        // Nothing was persisted and no signer was asked to commit.
        assert!(parts.store.active_signature_request(&order_id).await.unwrap().is_none());
        assert!(session_actions(&parts.audit).await.is_empty());
        for signer in &parts.signers {
            assert_eq!(signer.outstanding_nonces().await, 0);
        }
    }

    #[tokio::test]
    async fn completed_session_allows_retry_but_active_does_not() {
        let parts = parts_for(Chain::Ton).await;
        let clients: Vec<Arc<dyn SignerClient>> = parts
            .signers
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn SignerClient>)
            .collect();
        let coordinator = coordinator_with(&parts, clients);

        let order_id = bridge_types::OrderId::generate();

        // A dangling active row from a crashed process blocks new sessions.
        let stale = SignatureRequest {
            id: Uuid::new_v4(),
            order_id: order_id.clone(),
            chain: Chain::Ton,
            tx_data_hash: tx_data_hash(b"stale"),
            shares_received: 0,
            shares_required: 2,
            status: SignatureStatus::Collecting,
            final_signature: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        parts.store.insert_signature_request(&stale).await.unwrap();
        assert!(matches!(
            coordinator.request_signature(&order_id, Chain::Ton, b"tx").await,
            Err(SigningError::SessionActive(_))
        ));

        // Once that session is closed out, a fresh request goes through.
        let mut closed = stale.clone();
        closed.status = SignatureStatus::Failed;
        closed.completed_at = Some(Utc::now());
        parts.store.update_signature_request(&closed).await.unwrap();
        let request = coordinator
            .request_signature(&order_id, Chain::Ton, b"tx")
            .await
            .unwrap();
        assert_eq!(request.status, SignatureStatus::Completed);
    }

    #[tokio::test]
    async fn quorum_shortfall_fails_session_and_discards_nonces() {
        let parts = parts_for(Chain::Btc).await;
        // Only signer 1 is reachable; 2 and 3 are offline.
        let clients: Vec<Arc<dyn SignerClient>> = vec![
            Arc::clone(&parts.signers[0]) as Arc<dyn SignerClient>,
            Arc::new(DeadSigner { index: 2 }) as Arc<dyn SignerClient>,
            Arc::new(DeadSigner { index: 3 }) as Arc<dyn SignerClient>,
        ];
        let coordinator = coordinator_with(&parts, clients);

        let order_id = bridge_types::OrderId::generate();
        let err = coordinator
            .request_signature(&order_id, Chain::Btc, b"tx")
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::QuorumNotReached { got: 1, need: 2 }));

        // The lone responder's nonces were discarded with the session, the
        // persisted row is failed so a retry is possible, and the failure
        // is on the audit trail.
        assert_eq!(parts.signers[0].outstanding_nonces().await, 0);
        let active = parts.store.active_signature_request(&order_id).await.unwrap();
        assert!(active.is_none());
        assert_eq!(
            session_actions(&parts.audit).await,
            vec![
                "signing_session_opened",
                "signing_collection_started",
                "signing_session_failed",
            ]
        );
    }

    #[tokio::test]
    async fn share_progress_is_persisted_up_to_the_failure() {
        let output = TrustedDealer::run(2, 3).unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .insert_ceremony(&TrustedDealer::record(Chain::Ton, 2, 3, &output))
            .await
            .unwrap();
        let audit = Arc::new(AuditChain::new());

        // Signer 2 commits but loses its share; 1 and 2 get selected, so
        // exactly one share lands before the session dies.
        let mut clients: Vec<Arc<dyn SignerClient>> = Vec::new();
        for (index, kp) in output.key_packages {
            let signer = LocalSigner::new(index, kp);
            if index == 2 {
                clients.push(Arc::new(ShareLossSigner { inner: signer }));
            } else {
                clients.push(Arc::new(signer));
            }
        }
        let coordinator = SigningCoordinator::new(
            Arc::clone(&store) as Arc<dyn BridgeStore>,
            Arc::clone(&audit),
            clients,
            SigningConfig::default(),
        );

        let order_id = bridge_types::OrderId::generate();
        let err = coordinator
            .request_signature(&order_id, Chain::Ton, b"tx")
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::Timeout(_)));

        let rows: Vec<SignatureRequest> = {
            let mut found = Vec::new();
            for entry in audit.entries().await {
                if entry.action == "signing_session_opened" {
                    let id: Uuid = entry.entity_id.as_deref().unwrap().parse().unwrap();
                    found.push(store.fetch_signature_request(id).await.unwrap().unwrap());
                }
            }
            found
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, SignatureStatus::Failed);
        assert_eq!(rows[0].shares_received, 1, "progress up to the lost share persists");
    }
}
