//! End-to-end lifecycle tests with in-process collaborators: a mock chain
//! client, a fixed rate source, and real FROST signers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use bridge_audit::{AuditChain, Verification};
use bridge_engine::{
    ChainClient, CreateOrderRequest, EngineConfig, EngineError, ExpirySupervisor,
    LifecycleController, Outcome, RateSource,
};
use bridge_signing::{
    LocalSigner, SignerClient, SigningConfig, SigningCoordinator, SigningError, TrustedDealer,
};
use bridge_storage::{BridgeStore, MemoryStore};
use bridge_types::{Chain, Direction, Order, OrderEvent, OrderStatus, StatusKind, TxRef};

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn ton_address() -> String {
    format!("EQ{}", "A".repeat(46))
}

struct MockChainClient {
    broadcasts: AtomicU32,
    fail_broadcast: bool,
    fail_allocate: bool,
    broadcast_delay: Option<Duration>,
}

impl MockChainClient {
    fn ok() -> Self {
        Self {
            broadcasts: AtomicU32::new(0),
            fail_broadcast: false,
            fail_allocate: false,
            broadcast_delay: None,
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn allocate_deposit_address(
        &self,
        chain: Chain,
        order_id: &bridge_types::OrderId,
    ) -> bridge_engine::Result<String> {
        if self.fail_allocate {
            return Err(EngineError::Chain("address service unavailable".into()));
        }
        Ok(format!("dep_{}_{}", chain.as_str().to_lowercase(), order_id))
    }

    async fn broadcast(&self, chain: Chain, _signed_tx: &[u8]) -> bridge_engine::Result<TxRef> {
        if let Some(delay) = self.broadcast_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_broadcast {
            return Err(EngineError::Chain("destination node unreachable".into()));
        }
        let n = self.broadcasts.fetch_add(1, Ordering::SeqCst);
        Ok(TxRef(format!("{}_tx_{}", chain.as_str().to_lowercase(), n)))
    }
}

struct FixedRate(Decimal);

#[async_trait]
impl RateSource for FixedRate {
    async fn rate(&self, _direction: Direction) -> bridge_engine::Result<Decimal> {
        Ok(self.0)
    }
}

/// A signer that never answers, for quorum-shortfall paths.
struct DeadSigner(u16);

#[async_trait]
impl SignerClient for DeadSigner {
    fn index(&self) -> u16 {
        self.0
    }

    async fn commit(
        &self,
        _session: Uuid,
    ) -> bridge_signing::Result<frost_secp256k1::round1::SigningCommitments> {
        Err(SigningError::Timeout("signer offline".into()))
    }

    async fn produce_share(
        &self,
        session: Uuid,
        _package: &frost_secp256k1::SigningPackage,
    ) -> bridge_signing::Result<frost_secp256k1::round2::SignatureShare> {
        Err(SigningError::NoncesConsumed {
            signer: self.0,
            session,
        })
    }

    async fn abort(&self, _session: Uuid) {}
}

struct Harness {
    controller: Arc<LifecycleController>,
    store: Arc<MemoryStore>,
    audit: Arc<AuditChain>,
}

async fn harness_with(
    rate: &str,
    chain_client: MockChainClient,
    working_signers: usize,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(AuditChain::new());

    let output = TrustedDealer::run(2, 3).unwrap();
    store
        .insert_ceremony(&TrustedDealer::record(Chain::Ton, 2, 3, &output))
        .await
        .unwrap();
    let mut signers: Vec<Arc<dyn SignerClient>> = Vec::new();
    for (index, key_package) in output.key_packages {
        if (index as usize) <= working_signers {
            signers.push(Arc::new(LocalSigner::new(index, key_package)));
        } else {
            signers.push(Arc::new(DeadSigner(index)));
        }
    }
    let coordinator = Arc::new(SigningCoordinator::new(
        Arc::clone(&store) as Arc<dyn BridgeStore>,
        Arc::clone(&audit),
        signers,
        SigningConfig::default(),
    ));

    let controller = Arc::new(LifecycleController::new(
        Arc::clone(&store) as Arc<dyn BridgeStore>,
        Arc::clone(&audit),
        Arc::new(chain_client),
        Arc::new(FixedRate(dec(rate))),
        coordinator,
        EngineConfig::default(),
    ));

    Harness {
        controller,
        store,
        audit,
    }
}

async fn harness(rate: &str, fail_broadcast: bool, working_signers: usize) -> Harness {
    harness_with(
        rate,
        MockChainClient {
            fail_broadcast,
            ..MockChainClient::ok()
        },
        working_signers,
    )
    .await
}

fn xmr_to_ton_request(amount: &str) -> CreateOrderRequest {
    CreateOrderRequest {
        source: Chain::Xmr,
        dest: Chain::Ton,
        amount: dec(amount),
        dest_address: ton_address(),
        slippage: dec("1"),
    }
}

async fn fetch(h: &Harness, order: &Order) -> Order {
    h.store
        .fetch_order(&order.order_id)
        .await
        .unwrap()
        .unwrap()
}

/// Deliver the deposit and every confirmation one by one until `Bridging`.
async fn deposit_and_confirm(h: &Harness, order: &Order) {
    let outcome = h
        .controller
        .advance(
            &order.order_id,
            OrderEvent::DepositDetected {
                tx_ref: TxRef("xmr_deposit_1".into()),
                amount: order.from_amount,
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Transitioned { .. }));

    for count in 1..=order.confirmations_required {
        let outcome = h
            .controller
            .advance(&order.order_id, OrderEvent::ConfirmationUpdate { count })
            .await
            .unwrap();
        if count == 1 {
            assert_eq!(
                outcome,
                Outcome::Transitioned {
                    from: StatusKind::DepositDetected,
                    to: StatusKind::Confirming,
                }
            );
        }
        if count == order.confirmations_required {
            assert_eq!(
                outcome,
                Outcome::Transitioned {
                    from: StatusKind::Confirming,
                    to: StatusKind::Bridging,
                }
            );
        }
    }
}

async fn order_actions(h: &Harness) -> Vec<String> {
    h.audit
        .entries()
        .await
        .into_iter()
        .filter(|e| e.entity_type == "order")
        .map(|e| e.action)
        .collect()
}

#[tokio::test]
async fn xmr_to_ton_order_completes_end_to_end() {
    let h = harness("150", false, 3).await;

    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    assert_eq!(order.kind(), StatusKind::AwaitingDeposit);
    assert!(order.deposit_address.is_some());
    assert_eq!(order.confirmations_required, 10);
    // 0.3% fee on 1 XMR, the rest converted at 150: 0.997 * 150 = 149.55,
    // minus 1% slippage tolerance = 148.0545.
    assert_eq!(order.fee, dec("0.003"));
    assert_eq!(order.to_amount, dec("149.55"));
    assert_eq!(order.min_received, dec("148.0545"));

    // Ten confirmations delivered one at a time: the first moves the order
    // into Confirming, only the tenth releases it into Bridging.
    deposit_and_confirm(&h, &order).await;
    let confirmed = fetch(&h, &order).await;
    assert_eq!(confirmed.kind(), StatusKind::Bridging);
    assert_eq!(confirmed.confirmations_current(), 10);

    let order = h.controller.process_withdrawal(&order.order_id).await.unwrap();
    assert_eq!(order.kind(), StatusKind::Sending);
    assert!(order.status.withdrawal_tx().is_some());
    assert_eq!(order.signing_attempts, 1);

    h.controller
        .advance(&order.order_id, OrderEvent::WithdrawalConfirmed)
        .await
        .unwrap();
    let done = fetch(&h, &order).await;
    assert_eq!(done.kind(), StatusKind::Completed);

    // Every lifecycle step left exactly one order entry, the signing
    // session left one entry per row state change, and the chain verifies.
    assert_eq!(h.audit.verify_all().await.unwrap(), Verification::Valid);
    let mut expected = vec!["order_created", "awaiting_deposit", "deposit_detected"];
    expected.extend(std::iter::repeat("confirmation_update").take(9));
    expected.extend([
        "deposit_confirmed",
        "signing_started",
        "signature_produced",
        "withdrawal_submitting",
        "withdrawal_broadcast",
        "withdrawal_confirmed",
    ]);
    assert_eq!(order_actions(&h).await, expected);

    let session_actions: Vec<String> = h
        .audit
        .entries()
        .await
        .into_iter()
        .filter(|e| e.entity_type == "signature_request")
        .map(|e| e.action)
        .collect();
    assert_eq!(
        session_actions,
        vec![
            "signing_session_opened",
            "signing_collection_started",
            "signing_session_completed",
        ]
    );
}

#[tokio::test]
async fn duplicate_deliveries_are_no_ops() {
    let h = harness("150", false, 3).await;
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();

    let deposit = OrderEvent::DepositDetected {
        tx_ref: TxRef("xmr_deposit_1".into()),
        amount: dec("1"),
    };
    assert!(matches!(
        h.controller.advance(&order.order_id, deposit.clone()).await.unwrap(),
        Outcome::Transitioned { .. }
    ));
    assert_eq!(
        h.controller.advance(&order.order_id, deposit).await.unwrap(),
        Outcome::Unchanged
    );

    h.controller
        .advance(&order.order_id, OrderEvent::ConfirmationUpdate { count: 4 })
        .await
        .unwrap();
    assert_eq!(
        h.controller
            .advance(&order.order_id, OrderEvent::ConfirmationUpdate { count: 4 })
            .await
            .unwrap(),
        Outcome::Unchanged
    );
    assert_eq!(fetch(&h, &order).await.kind(), StatusKind::Confirming);
}

#[tokio::test]
async fn confirmation_regression_flags_manual_review() {
    let h = harness("150", false, 3).await;
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    h.controller
        .advance(
            &order.order_id,
            OrderEvent::DepositDetected {
                tx_ref: TxRef("xmr_deposit_1".into()),
                amount: dec("1"),
            },
        )
        .await
        .unwrap();
    h.controller
        .advance(&order.order_id, OrderEvent::ConfirmationUpdate { count: 6 })
        .await
        .unwrap();

    // A reorg reported fewer confirmations: hold position, flag the order.
    let outcome = h
        .controller
        .advance(&order.order_id, OrderEvent::ConfirmationUpdate { count: 2 })
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Unchanged);

    let flagged = fetch(&h, &order).await;
    assert_eq!(flagged.confirmations_current(), 6);
    assert_eq!(flagged.metadata["manual_review"], serde_json::json!(true));
    assert!(order_actions(&h)
        .await
        .contains(&"confirmation_regression".to_string()));
}

#[tokio::test]
async fn wrong_amount_deposit_fails_order() {
    let h = harness("150", false, 3).await;
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();

    h.controller
        .advance(
            &order.order_id,
            OrderEvent::DepositDetected {
                tx_ref: TxRef("xmr_deposit_1".into()),
                amount: dec("0.5"),
            },
        )
        .await
        .unwrap();

    let failed = fetch(&h, &order).await;
    assert_eq!(failed.kind(), StatusKind::Failed);
    assert!(failed
        .status
        .failure_reason()
        .unwrap()
        .contains("does not match"));
}

#[tokio::test]
async fn deposit_after_expiry_window_fails_order() {
    let h = harness("150", false, 3).await;
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();

    let mut stale = fetch(&h, &order).await;
    stale.expires_at = Utc::now() - chrono::Duration::minutes(1);
    h.store.update_order(&stale).await.unwrap();

    h.controller
        .advance(
            &order.order_id,
            OrderEvent::DepositDetected {
                tx_ref: TxRef("xmr_deposit_1".into()),
                amount: dec("1"),
            },
        )
        .await
        .unwrap();
    let failed = fetch(&h, &order).await;
    assert_eq!(failed.kind(), StatusKind::Failed);
    assert!(failed.status.failure_reason().unwrap().contains("expiry"));
}

#[tokio::test]
async fn expiry_sweep_and_racing_deposit_resolve_once() {
    let h = harness("150", false, 3).await;
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();

    let mut stale = fetch(&h, &order).await;
    stale.expires_at = Utc::now() - chrono::Duration::minutes(1);
    h.store.update_order(&stale).await.unwrap();

    let supervisor = ExpirySupervisor::new(
        Arc::clone(&h.controller),
        Duration::from_secs(300),
        100,
    );
    assert_eq!(supervisor.sweep_once().await.unwrap(), 1);
    assert_eq!(fetch(&h, &order).await.kind(), StatusKind::Expired);

    // The late deposit loses the race: terminal state, no second outcome.
    let outcome = h
        .controller
        .advance(
            &order.order_id,
            OrderEvent::DepositDetected {
                tx_ref: TxRef("xmr_deposit_1".into()),
                amount: dec("1"),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Unchanged);
    assert_eq!(fetch(&h, &order).await.kind(), StatusKind::Expired);

    // A second sweep finds nothing.
    assert_eq!(supervisor.sweep_once().await.unwrap(), 0);
}

#[tokio::test]
async fn stale_pre_allocation_order_is_expired_by_sweep() {
    // Address allocation fails after the order row is persisted, leaving it
    // parked in Created; the sweep must still close its window.
    let h = harness_with(
        "150",
        MockChainClient {
            fail_allocate: true,
            ..MockChainClient::ok()
        },
        3,
    )
    .await;

    let err = h.controller.create_order(xmr_to_ton_request("1")).await.unwrap_err();
    assert!(matches!(err, EngineError::Chain(_)));

    let created = h
        .store
        .orders_with_status(StatusKind::Created, 10)
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    let mut parked = created.into_iter().next().unwrap();
    parked.expires_at = Utc::now() - chrono::Duration::minutes(1);
    h.store.update_order(&parked).await.unwrap();

    let supervisor = ExpirySupervisor::new(
        Arc::clone(&h.controller),
        Duration::from_secs(300),
        100,
    );
    assert_eq!(supervisor.sweep_once().await.unwrap(), 1);
    let swept = h.store.fetch_order(&parked.order_id).await.unwrap().unwrap();
    assert_eq!(swept.kind(), StatusKind::Expired);
}

#[tokio::test]
async fn expiry_never_touches_an_order_with_a_deposit() {
    let h = harness("150", false, 3).await;
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    h.controller
        .advance(
            &order.order_id,
            OrderEvent::DepositDetected {
                tx_ref: TxRef("xmr_deposit_1".into()),
                amount: dec("1"),
            },
        )
        .await
        .unwrap();

    let outcome = h
        .controller
        .advance(&order.order_id, OrderEvent::Expire)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Unchanged);
    assert_eq!(fetch(&h, &order).await.kind(), StatusKind::DepositDetected);
}

#[tokio::test]
async fn validation_rejects_before_anything_is_persisted() {
    let h = harness("150", false, 3).await;

    let bad_address = CreateOrderRequest {
        dest_address: "not_a_ton_address".into(),
        ..xmr_to_ton_request("1")
    };
    assert!(matches!(
        h.controller.create_order(bad_address).await,
        Err(EngineError::InvalidAddress { .. })
    ));

    let same_chain = CreateOrderRequest {
        dest: Chain::Xmr,
        dest_address: format!("4{}", "A".repeat(94)),
        ..xmr_to_ton_request("1")
    };
    assert!(matches!(
        h.controller.create_order(same_chain).await,
        Err(EngineError::UnsupportedDirection(_))
    ));

    let dust = xmr_to_ton_request("0.00001");
    assert!(matches!(
        h.controller.create_order(dust).await,
        Err(EngineError::InvalidAmount(_))
    ));

    let wild_slippage = CreateOrderRequest {
        slippage: dec("50"),
        ..xmr_to_ton_request("1")
    };
    assert!(matches!(
        h.controller.create_order(wild_slippage).await,
        Err(EngineError::InvalidSlippage(_))
    ));

    assert!(h.audit.is_empty().await);
    let created = h
        .store
        .orders_with_status(StatusKind::Created, 10)
        .await
        .unwrap();
    let awaiting = h
        .store
        .orders_with_status(StatusKind::AwaitingDeposit, 10)
        .await
        .unwrap();
    assert!(created.is_empty() && awaiting.is_empty());
}

#[tokio::test]
async fn signing_exhaustion_routes_to_refunding_then_refunded() {
    // Single working signer, threshold 2: every attempt falls short.
    let h = harness("150", false, 1).await;
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    deposit_and_confirm(&h, &order).await;

    let order = h.controller.process_withdrawal(&order.order_id).await.unwrap();
    assert_eq!(order.kind(), StatusKind::Refunding);
    assert_eq!(order.signing_attempts, 3);
    let reason = order.status.failure_reason().unwrap();
    assert!(reason.contains("signing failed after 3 attempts"));

    // Every failed session left its own audit trace.
    let failed_sessions = h
        .audit
        .entries()
        .await
        .into_iter()
        .filter(|e| e.entity_type == "signature_request" && e.action == "signing_session_failed")
        .count();
    assert_eq!(failed_sessions, 3);

    h.controller
        .advance(
            &order.order_id,
            OrderEvent::RefundIssued {
                tx_ref: Some(TxRef("xmr_refund_1".into())),
            },
        )
        .await
        .unwrap();
    let refunded = fetch(&h, &order).await;
    assert_eq!(refunded.kind(), StatusKind::Refunded);
    assert!(matches!(
        refunded.status,
        OrderStatus::Refunded { refund_tx: Some(_) }
    ));
    assert_eq!(h.audit.verify_all().await.unwrap(), Verification::Valid);
}

#[tokio::test]
async fn broadcast_failure_routes_to_refunding() {
    let h = harness("150", true, 3).await;
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    deposit_and_confirm(&h, &order).await;

    let order = h.controller.process_withdrawal(&order.order_id).await.unwrap();
    assert_eq!(order.kind(), StatusKind::Refunding);
    assert!(order.status.failure_reason().unwrap().contains("broadcast failed"));
}

#[tokio::test(start_paused = true)]
async fn hung_broadcast_times_out_into_refunding() {
    let h = harness_with(
        "150",
        MockChainClient {
            broadcast_delay: Some(Duration::from_secs(3600)),
            ..MockChainClient::ok()
        },
        3,
    )
    .await;
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    deposit_and_confirm(&h, &order).await;

    let order = h.controller.process_withdrawal(&order.order_id).await.unwrap();
    assert_eq!(order.kind(), StatusKind::Refunding);
    assert!(order.status.failure_reason().unwrap().contains("timed out"));
}

#[tokio::test]
async fn audit_trail_contains_only_valid_edges() {
    // Run one completing order and one refunding order, then check that
    // every (from, to) pair the audit trail recorded is a directed edge of
    // the status machine.
    let h = harness("150", false, 3).await;

    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    deposit_and_confirm(&h, &order).await;
    h.controller.process_withdrawal(&order.order_id).await.unwrap();
    h.controller
        .advance(&order.order_id, OrderEvent::WithdrawalConfirmed)
        .await
        .unwrap();

    let refund = h
        .controller
        .create_order(xmr_to_ton_request("2"))
        .await
        .unwrap();
    deposit_and_confirm(&h, &refund).await;
    h.controller
        .advance(
            &refund.order_id,
            OrderEvent::Fail {
                reason: "operator abort".into(),
            },
        )
        .await
        .unwrap();
    h.controller
        .advance(&refund.order_id, OrderEvent::RefundIssued { tx_ref: None })
        .await
        .unwrap();

    let mut checked = 0;
    for entry in h.audit.entries().await {
        let (Some(from), Some(to)) = (entry.details.get("from"), entry.details.get("to")) else {
            continue;
        };
        let from: StatusKind = serde_json::from_value(from.clone()).unwrap();
        let to: StatusKind = serde_json::from_value(to.clone()).unwrap();
        assert!(
            from == to || from.can_transition_to(to),
            "audit recorded illegal edge {from} -> {to} in entry {}",
            entry.seq
        );
        checked += 1;
    }
    assert!(checked >= 12, "expected transition entries for both orders");
    assert_eq!(h.audit.verify_all().await.unwrap(), Verification::Valid);
}

#[tokio::test]
async fn cancellation_is_pre_deposit_only() {
    let h = harness("150", false, 3).await;

    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    let cancelled = h.controller.cancel_order(&order.order_id).await.unwrap();
    assert_eq!(cancelled.kind(), StatusKind::Expired);

    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    h.controller
        .advance(
            &order.order_id,
            OrderEvent::DepositDetected {
                tx_ref: TxRef("xmr_deposit_2".into()),
                amount: dec("1"),
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        h.controller.cancel_order(&order.order_id).await,
        Err(EngineError::NotCancellable { .. })
    ));
}

#[tokio::test]
async fn terminal_orders_release_their_lock_entries() {
    let h = harness("150", false, 3).await;

    // Cancellation ends in a terminal state; its lock entry goes with it.
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    h.controller.cancel_order(&order.order_id).await.unwrap();
    assert_eq!(h.controller.order_locks_held().await, 0);

    // An in-flight order keeps its entry until it completes.
    let order = h
        .controller
        .create_order(xmr_to_ton_request("1"))
        .await
        .unwrap();
    deposit_and_confirm(&h, &order).await;
    assert!(h.controller.order_locks_held().await >= 1);

    h.controller.process_withdrawal(&order.order_id).await.unwrap();
    h.controller
        .advance(&order.order_id, OrderEvent::WithdrawalConfirmed)
        .await
        .unwrap();
    assert_eq!(fetch(&h, &order).await.kind(), StatusKind::Completed);
    assert_eq!(h.controller.order_locks_held().await, 0);
}
