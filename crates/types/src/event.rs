use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::TxRef;

/// External or internal events consumed by the lifecycle controller's
/// `advance` entry point. Events are delivered at-least-once; `advance`
/// checks each event's precondition against the order's current status, so
/// a duplicate delivery is a no-op rather than a double transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    /// The deposit monitor observed an incoming transfer to the order's
    /// deposit address.
    DepositDetected { tx_ref: TxRef, amount: Decimal },
    /// The confirmation monitor reported a new confirmation depth for the
    /// deposit transaction.
    ConfirmationUpdate { count: i32 },
    /// The signing coordinator produced a verified group signature.
    SignatureProduced { signature: Vec<u8> },
    /// The signing session failed (timeout, verification failure, quorum
    /// not met) with no retry budget left.
    SignatureFailed { reason: String },
    /// The signed withdrawal was broadcast on the destination chain.
    Broadcast { tx_ref: TxRef },
    /// The destination chain confirmed the withdrawal transaction.
    WithdrawalConfirmed,
    /// A refund transaction was issued back to the depositor.
    RefundIssued { tx_ref: Option<TxRef> },
    /// The deposit window elapsed without a deposit.
    Expire,
    /// Operator- or system-initiated failure with a reason.
    Fail { reason: String },
}

impl OrderEvent {
    /// Short action name used for audit entries.
    pub fn action(&self) -> &'static str {
        match self {
            OrderEvent::DepositDetected { .. } => "deposit_detected",
            OrderEvent::ConfirmationUpdate { .. } => "confirmation_update",
            OrderEvent::SignatureProduced { .. } => "signature_produced",
            OrderEvent::SignatureFailed { .. } => "signature_failed",
            OrderEvent::Broadcast { .. } => "withdrawal_broadcast",
            OrderEvent::WithdrawalConfirmed => "withdrawal_confirmed",
            OrderEvent::RefundIssued { .. } => "refund_issued",
            OrderEvent::Expire => "order_expired",
            OrderEvent::Fail { .. } => "order_failed",
        }
    }
}
