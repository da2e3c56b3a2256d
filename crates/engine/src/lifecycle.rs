//! Order lifecycle controller.
//!
//! Sole mutation point for orders. `create_order` validates and opens the
//! deposit window; `advance` consumes lifecycle events under a per-order
//! lock with precondition checks so duplicate deliveries are no-ops;
//! `process_withdrawal` drives the signing and broadcast leg. Audit entries
//! are written before the side effects they describe.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use bridge_audit::{AuditChain, Verification};
use bridge_signing::SigningCoordinator;
use bridge_storage::BridgeStore;
use bridge_types::{
    calculate_conversion, validate_address, Chain, Direction, Order, OrderEvent, OrderId,
    OrderStatus, StatusKind,
};

use crate::chain::{ChainClient, RateSource};
use crate::config::EngineConfig;
use crate::metrics;
use crate::{EngineError, Result};

/// User-facing order creation parameters. Everything else on the order is
/// derived from configuration and the captured rate.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub source: Chain,
    pub dest: Chain,
    pub amount: Decimal,
    pub dest_address: String,
    /// Slippage tolerance in percent.
    pub slippage: Decimal,
}

/// What `advance` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Transitioned { from: StatusKind, to: StatusKind },
    /// Precondition did not hold (duplicate or stale delivery); the order
    /// was left exactly as it was.
    Unchanged,
}

pub struct LifecycleController {
    store: Arc<dyn BridgeStore>,
    audit: Arc<AuditChain>,
    chain_client: Arc<dyn ChainClient>,
    rate_source: Arc<dyn RateSource>,
    coordinator: Arc<SigningCoordinator>,
    config: EngineConfig,
    locks: Mutex<HashMap<OrderId, Arc<Mutex<()>>>>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn BridgeStore>,
        audit: Arc<AuditChain>,
        chain_client: Arc<dyn ChainClient>,
        rate_source: Arc<dyn RateSource>,
        coordinator: Arc<SigningCoordinator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            audit,
            chain_client,
            rate_source,
            coordinator,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn audit(&self) -> &Arc<AuditChain> {
        &self.audit
    }

    /// Validate a request, capture a quote, allocate a deposit address,
    /// and open the deposit window.
    ///
    /// Validation failures reject the request before anything is persisted.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        let direction = Direction::new(request.source, request.dest);
        if !direction.is_supported() {
            return Err(EngineError::UnsupportedDirection(direction.to_string()));
        }
        if request.amount < self.config.order.min_amount
            || request.amount > self.config.order.max_amount
        {
            return Err(EngineError::InvalidAmount(format!(
                "{} outside [{}, {}]",
                request.amount, self.config.order.min_amount, self.config.order.max_amount
            )));
        }
        if !validate_address(request.dest, &request.dest_address) {
            return Err(EngineError::InvalidAddress {
                chain: request.dest,
                address: request.dest_address,
            });
        }
        if request.slippage < Decimal::ZERO || request.slippage > self.config.order.max_slippage {
            return Err(EngineError::InvalidSlippage(request.slippage));
        }

        let rate = self.rate_source.rate(direction).await?;
        let quote = calculate_conversion(
            request.amount,
            rate,
            self.config.order.fee_percent,
            request.slippage,
        );

        let now = Utc::now();
        let order_id = OrderId::generate();
        let mut order = Order {
            id: Uuid::new_v4(),
            order_id: order_id.clone(),
            direction,
            from_amount: quote.from_amount,
            to_amount: quote.to_amount,
            rate_at_creation: rate,
            fee: quote.fee,
            fee_percent: quote.fee_percent,
            slippage: request.slippage,
            min_received: quote.min_received,
            dest_address: request.dest_address,
            deposit_address: None,
            status: OrderStatus::Created,
            confirmations_required: request.source.required_confirmations(),
            signing_attempts: 0,
            metadata: json!({}),
            expires_at: now + chrono::Duration::minutes(self.config.order.expiry_minutes),
            created_at: now,
            updated_at: now,
        };

        self.audit
            .append(
                "order_created",
                "order",
                Some(order_id.as_str()),
                "lifecycle",
                json!({
                    "direction": direction.to_string(),
                    "from_amount": order.from_amount,
                    "to_amount": order.to_amount,
                    "rate": rate,
                    "fee": order.fee,
                    "min_received": order.min_received,
                    "expires_at": order.expires_at,
                }),
            )
            .await?;
        self.store.insert_order(&order).await?;
        metrics::ORDERS_CREATED.inc();
        info!(order_id = %order_id, direction = %direction, amount = %order.from_amount,
            "order created");

        let deposit_address = self
            .chain_client
            .allocate_deposit_address(request.source, &order_id)
            .await?;
        order.deposit_address = Some(deposit_address.clone());
        self.transition(
            &mut order,
            OrderStatus::AwaitingDeposit,
            "awaiting_deposit",
            json!({ "deposit_address": deposit_address }),
        )
        .await?;

        Ok(order)
    }

    /// Current state of an order, for callers and operator tooling.
    pub async fn get_order(&self, order_id: &OrderId) -> Result<Order> {
        self.store
            .fetch_order(order_id)
            .await?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.clone()))
    }

    /// Apply one lifecycle event to an order.
    ///
    /// Events are delivered at-least-once; an event whose precondition does
    /// not hold against the current status returns [`Outcome::Unchanged`].
    pub async fn advance(&self, order_id: &OrderId, event: OrderEvent) -> Result<Outcome> {
        let lock = self.order_lock(order_id).await;
        let guard = lock.lock().await;

        let Some(mut order) = self.store.fetch_order(order_id).await? else {
            drop(guard);
            self.release_lock(order_id, &lock).await;
            return Err(EngineError::OrderNotFound(order_id.clone()));
        };
        let outcome = self.apply(&mut order, event).await;
        let terminal = order.kind().is_terminal();
        drop(guard);
        if terminal {
            self.release_lock(order_id, &lock).await;
        }
        outcome
    }

    /// Drive a bridging order through signing, broadcast, and into
    /// `Sending`. Post-deposit failures route to `Refunding`.
    ///
    /// Returns the order in its resulting state; the caller reads the
    /// status to learn whether the withdrawal is on its way.
    pub async fn process_withdrawal(&self, order_id: &OrderId) -> Result<Order> {
        let lock = self.order_lock(order_id).await;
        let guard = lock.lock().await;

        let Some(mut order) = self.store.fetch_order(order_id).await? else {
            drop(guard);
            self.release_lock(order_id, &lock).await;
            return Err(EngineError::OrderNotFound(order_id.clone()));
        };
        let result = self.drive_withdrawal(&mut order).await;
        let terminal = order.kind().is_terminal();
        drop(guard);
        if terminal {
            self.release_lock(order_id, &lock).await;
        }
        result.map(|_| order)
    }

    /// The signing and broadcast leg proper. Callers hold the order's lock.
    async fn drive_withdrawal(&self, order: &mut Order) -> Result<()> {
        let deposit_tx = match &order.status {
            OrderStatus::Bridging { deposit_tx } => deposit_tx.clone(),
            other => {
                return Err(EngineError::WrongState {
                    order_id: order.order_id.clone(),
                    expected: StatusKind::Bridging,
                    got: other.kind(),
                })
            }
        };

        let dest = order.direction.dest;
        self.transition(
            order,
            OrderStatus::Signing { deposit_tx },
            "signing_started",
            json!({ "dest_chain": dest.as_str() }),
        )
        .await?;

        let tx_data = withdrawal_tx_data(order);
        loop {
            order.signing_attempts += 1;
            order.updated_at = Utc::now();
            self.store.update_order(order).await?;

            metrics::ACTIVE_SIGNING_SESSIONS.inc();
            let timer = metrics::SIGNING_DURATION.start_timer();
            let attempt = self
                .coordinator
                .request_signature(&order.order_id, dest, &tx_data)
                .await;
            timer.observe_duration();
            metrics::ACTIVE_SIGNING_SESSIONS.dec();

            let signature = match attempt {
                Ok(request) => match request.final_signature {
                    Some(signature) => signature,
                    None => {
                        // Completed requests always carry a signature;
                        // treat a bare one as a failed attempt.
                        warn!(order_id = %order.order_id, "completed session without signature");
                        continue;
                    }
                },
                Err(err) => {
                    warn!(order_id = %order.order_id, attempt = order.signing_attempts,
                        error = %err, "signing attempt failed");
                    if order.signing_attempts >= self.config.signing.max_signing_attempts {
                        let reason = format!(
                            "signing failed after {} attempts: {err}",
                            order.signing_attempts
                        );
                        self.apply(order, OrderEvent::SignatureFailed { reason }).await?;
                        return Ok(());
                    }
                    continue;
                }
            };

            self.apply(
                order,
                OrderEvent::SignatureProduced {
                    signature: signature.clone(),
                },
            )
            .await?;

            self.audit
                .append(
                    "withdrawal_submitting",
                    "order",
                    Some(order.order_id.as_str()),
                    "lifecycle",
                    json!({ "chain": dest.as_str() }),
                )
                .await?;
            let broadcast_timeout = Duration::from_secs(self.config.chain.broadcast_timeout_secs);
            let broadcast = tokio::time::timeout(
                broadcast_timeout,
                self.chain_client.broadcast(dest, &signature),
            )
            .await
            .unwrap_or_else(|_| {
                Err(EngineError::Chain(format!(
                    "broadcast timed out after {}s",
                    broadcast_timeout.as_secs()
                )))
            });
            match broadcast {
                Ok(tx_ref) => {
                    self.apply(order, OrderEvent::Broadcast { tx_ref }).await?;
                }
                Err(err) => {
                    self.apply(
                        order,
                        OrderEvent::Fail {
                            reason: format!("broadcast failed: {err}"),
                        },
                    )
                    .await?;
                }
            }
            return Ok(());
        }
    }

    /// Cancel an order that has not yet received a deposit. Cancellation
    /// closes the deposit window, so the resulting state is `Expired`.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<Order> {
        let lock = self.order_lock(order_id).await;
        let guard = lock.lock().await;

        let Some(mut order) = self.store.fetch_order(order_id).await? else {
            drop(guard);
            self.release_lock(order_id, &lock).await;
            return Err(EngineError::OrderNotFound(order_id.clone()));
        };
        let result = match order.kind() {
            StatusKind::Created | StatusKind::AwaitingDeposit => {
                self.transition(
                    &mut order,
                    OrderStatus::Expired,
                    "order_cancelled",
                    json!({ "cancelled_by": "user" }),
                )
                .await
                .map(|_| {
                    metrics::ORDERS_EXPIRED.inc();
                })
            }
            kind => Err(EngineError::NotCancellable {
                order_id: order_id.clone(),
                kind,
            }),
        };
        let terminal = order.kind().is_terminal();
        drop(guard);
        if terminal {
            self.release_lock(order_id, &lock).await;
        }
        result.map(|_| order)
    }

    /// Verify the audit chain, or a sub-range of it, for operator tooling.
    pub async fn verify_audit_chain(&self, range: Option<Range<u64>>) -> Result<Verification> {
        let verification = match range {
            Some(range) => self.audit.verify(range).await?,
            None => self.audit.verify_all().await?,
        };
        Ok(verification)
    }

    pub(crate) async fn expiry_candidates(&self, limit: usize) -> Result<Vec<Order>> {
        Ok(self.store.expiry_candidates(Utc::now(), limit).await?)
    }

    pub(crate) async fn orders_with_status(
        &self,
        kind: StatusKind,
        limit: usize,
    ) -> Result<Vec<Order>> {
        Ok(self.store.orders_with_status(kind, limit).await?)
    }

    async fn order_lock(&self, order_id: &OrderId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(order_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the registry entry for a finished order. At a strong count of
    /// two the only handles are the registry's and ours, so no other task
    /// holds or awaits the lock; otherwise the entry stays for the holder.
    async fn release_lock(&self, order_id: &OrderId, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(lock) == 2 {
            locks.remove(order_id);
        }
    }

    /// Number of live per-order lock entries.
    pub async fn order_locks_held(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Event dispatch. Callers must hold the order's lock.
    async fn apply(&self, order: &mut Order, event: OrderEvent) -> Result<Outcome> {
        let action = event.action();
        match event {
            OrderEvent::DepositDetected { tx_ref, amount } => match &order.status {
                OrderStatus::AwaitingDeposit => {
                    if order.is_expired_at(Utc::now()) {
                        return self
                            .transition(
                                order,
                                OrderStatus::Failed {
                                    reason: "deposit received after expiry window".to_string(),
                                },
                                action,
                                json!({ "tx_ref": tx_ref.0, "amount": amount }),
                            )
                            .await;
                    }
                    if amount != order.from_amount {
                        return self
                            .transition(
                                order,
                                OrderStatus::Failed {
                                    reason: format!(
                                        "deposit amount {amount} does not match expected {}",
                                        order.from_amount
                                    ),
                                },
                                action,
                                json!({ "tx_ref": tx_ref.0, "amount": amount }),
                            )
                            .await;
                    }
                    let details = json!({ "tx_ref": tx_ref.0.clone(), "amount": amount });
                    self.transition(
                        order,
                        OrderStatus::DepositDetected { deposit_tx: tx_ref },
                        action,
                        details,
                    )
                    .await
                }
                _ => self.unchanged(order, action),
            },

            OrderEvent::ConfirmationUpdate { count } => match order.status.clone() {
                OrderStatus::DepositDetected { deposit_tx } => {
                    self.transition(
                        order,
                        OrderStatus::Confirming {
                            deposit_tx: deposit_tx.clone(),
                            confirmations: count,
                        },
                        action,
                        json!({ "confirmations": count, "required": order.confirmations_required }),
                    )
                    .await?;
                    if count >= order.confirmations_required {
                        self.transition(
                            order,
                            OrderStatus::Bridging { deposit_tx },
                            "deposit_confirmed",
                            json!({ "confirmations": count }),
                        )
                        .await?;
                        return Ok(Outcome::Transitioned {
                            from: StatusKind::DepositDetected,
                            to: StatusKind::Bridging,
                        });
                    }
                    Ok(Outcome::Transitioned {
                        from: StatusKind::DepositDetected,
                        to: StatusKind::Confirming,
                    })
                }
                OrderStatus::Confirming {
                    deposit_tx,
                    confirmations,
                } => {
                    if count == confirmations {
                        return self.unchanged(order, action);
                    }
                    if count < confirmations {
                        return self.flag_confirmation_regression(order, confirmations, count).await;
                    }
                    if count >= order.confirmations_required {
                        return self
                            .transition(
                                order,
                                OrderStatus::Bridging { deposit_tx },
                                "deposit_confirmed",
                                json!({ "confirmations": count }),
                            )
                            .await;
                    }
                    self.transition(
                        order,
                        OrderStatus::Confirming {
                            deposit_tx,
                            confirmations: count,
                        },
                        action,
                        json!({ "confirmations": count, "required": order.confirmations_required }),
                    )
                    .await
                }
                _ => self.unchanged(order, action),
            },

            OrderEvent::SignatureProduced { signature } => match &order.status {
                // The status moves on broadcast; the signature itself is
                // recorded for the audit trail.
                OrderStatus::Signing { .. } => {
                    self.audit
                        .append(
                            action,
                            "order",
                            Some(order.order_id.as_str()),
                            "signing",
                            json!({ "signature_len": signature.len() }),
                        )
                        .await?;
                    Ok(Outcome::Unchanged)
                }
                _ => self.unchanged(order, action),
            },

            OrderEvent::SignatureFailed { reason } => match &order.status {
                OrderStatus::Signing { .. } => {
                    self.transition(
                        order,
                        OrderStatus::Refunding { reason: reason.clone() },
                        action,
                        json!({ "reason": reason }),
                    )
                    .await
                }
                _ => self.unchanged(order, action),
            },

            OrderEvent::Broadcast { tx_ref } => match order.status.clone() {
                OrderStatus::Signing { deposit_tx } => {
                    let details = json!({ "tx_ref": tx_ref.0.clone() });
                    self.transition(
                        order,
                        OrderStatus::Sending {
                            deposit_tx,
                            withdrawal_tx: tx_ref,
                        },
                        action,
                        details,
                    )
                    .await
                }
                _ => self.unchanged(order, action),
            },

            OrderEvent::WithdrawalConfirmed => match order.status.clone() {
                OrderStatus::Sending {
                    deposit_tx,
                    withdrawal_tx,
                } => {
                    self.transition(
                        order,
                        OrderStatus::Completed {
                            deposit_tx,
                            withdrawal_tx,
                        },
                        action,
                        json!({}),
                    )
                    .await
                }
                _ => self.unchanged(order, action),
            },

            OrderEvent::RefundIssued { tx_ref } => match &order.status {
                OrderStatus::Refunding { .. } => {
                    let details = json!({ "tx_ref": tx_ref.as_ref().map(|t| t.0.clone()) });
                    self.transition(
                        order,
                        OrderStatus::Refunded { refund_tx: tx_ref },
                        action,
                        details,
                    )
                    .await
                }
                _ => self.unchanged(order, action),
            },

            OrderEvent::Expire => match &order.status {
                OrderStatus::Created | OrderStatus::AwaitingDeposit => {
                    let outcome = self
                        .transition(order, OrderStatus::Expired, action, json!({}))
                        .await?;
                    metrics::ORDERS_EXPIRED.inc();
                    Ok(outcome)
                }
                // A deposit already won the race, or the order is done.
                _ => self.unchanged(order, action),
            },

            OrderEvent::Fail { reason } => match order.kind() {
                StatusKind::Created | StatusKind::AwaitingDeposit => {
                    self.transition(
                        order,
                        OrderStatus::Failed { reason: reason.clone() },
                        action,
                        json!({ "reason": reason }),
                    )
                    .await
                }
                // Funds were already received: route through a refund.
                StatusKind::DepositDetected
                | StatusKind::Confirming
                | StatusKind::Bridging
                | StatusKind::Signing
                | StatusKind::Sending => {
                    self.transition(
                        order,
                        OrderStatus::Refunding { reason: reason.clone() },
                        action,
                        json!({ "reason": reason }),
                    )
                    .await
                }
                _ => self.unchanged(order, action),
            },
        }
    }

    /// Confirmation counts only increase. A decrease (a reorg) is flagged
    /// for manual review and reported, never rolled back.
    async fn flag_confirmation_regression(
        &self,
        order: &mut Order,
        held: i32,
        reported: i32,
    ) -> Result<Outcome> {
        warn!(order_id = %order.order_id, held = held, reported = reported,
            "confirmation count regressed, flagging for manual review");
        self.audit
            .append(
                "confirmation_regression",
                "order",
                Some(order.order_id.as_str()),
                "lifecycle",
                json!({ "held": held, "reported": reported }),
            )
            .await?;
        if let Some(map) = order.metadata.as_object_mut() {
            map.insert("manual_review".to_string(), json!(true));
        }
        order.updated_at = Utc::now();
        self.store.update_order(order).await?;
        metrics::MANUAL_REVIEW_FLAGS.inc();
        Ok(Outcome::Unchanged)
    }

    fn unchanged(&self, order: &Order, action: &str) -> Result<Outcome> {
        info!(order_id = %order.order_id, status = %order.kind(), event = action,
            "event precondition not met, order unchanged");
        Ok(Outcome::Unchanged)
    }

    /// Audit, then persist, then count. Callers must hold the order's lock
    /// and have checked the event's precondition.
    async fn transition(
        &self,
        order: &mut Order,
        next: OrderStatus,
        action: &str,
        mut details: serde_json::Value,
    ) -> Result<Outcome> {
        let from = order.kind();
        let to = next.kind();
        if from != to && !from.can_transition_to(to) {
            warn!(order_id = %order.order_id, from = %from, to = %to,
                "transition not in edge table, order unchanged");
            return Ok(Outcome::Unchanged);
        }

        // The audit trail records the edge itself, so an independent
        // verifier can check every observed pair against the edge table.
        if let Some(map) = details.as_object_mut() {
            map.insert("from".to_string(), json!(from.as_str()));
            map.insert("to".to_string(), json!(to.as_str()));
        }
        self.audit
            .append(action, "order", Some(order.order_id.as_str()), "lifecycle", details)
            .await?;
        order.status = next;
        order.updated_at = Utc::now();
        self.store.update_order(order).await?;

        metrics::ORDER_TRANSITIONS
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
        info!(order_id = %order.order_id, from = %from, to = %to, "order transitioned");
        Ok(Outcome::Transitioned { from, to })
    }
}

/// Canonical bytes the signer set commits to for one withdrawal.
fn withdrawal_tx_data(order: &Order) -> Vec<u8> {
    // Field order is fixed; the same order must always hash identically.
    format!(
        "{}|{}|{}|{}|{}",
        order.order_id,
        order.direction.dest.as_str(),
        order.dest_address,
        order.to_amount,
        order.min_received
    )
    .into_bytes()
}
