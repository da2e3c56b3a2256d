use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::Direction;

/// Human-readable order identifier: `br_` followed by 12 hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    pub fn generate() -> Self {
        let bytes: [u8; 6] = rand::random();
        Self(format!("br_{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An on-chain transaction reference (hash/id in the chain's native format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef(pub String);

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order status with state-specific payload.
///
/// The payload makes illegal field combinations unrepresentable: a deposit
/// transaction reference exists from `DepositDetected` on, a withdrawal
/// reference only in `Sending`/`Completed`, and a failure reason only in the
/// failure branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    AwaitingDeposit,
    DepositDetected {
        deposit_tx: TxRef,
    },
    Confirming {
        deposit_tx: TxRef,
        confirmations: i32,
    },
    Bridging {
        deposit_tx: TxRef,
    },
    Signing {
        deposit_tx: TxRef,
    },
    Sending {
        deposit_tx: TxRef,
        withdrawal_tx: TxRef,
    },
    Completed {
        deposit_tx: TxRef,
        withdrawal_tx: TxRef,
    },
    Failed {
        reason: String,
    },
    Refunding {
        reason: String,
    },
    Refunded {
        refund_tx: Option<TxRef>,
    },
    Expired,
}

impl OrderStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            OrderStatus::Created => StatusKind::Created,
            OrderStatus::AwaitingDeposit => StatusKind::AwaitingDeposit,
            OrderStatus::DepositDetected { .. } => StatusKind::DepositDetected,
            OrderStatus::Confirming { .. } => StatusKind::Confirming,
            OrderStatus::Bridging { .. } => StatusKind::Bridging,
            OrderStatus::Signing { .. } => StatusKind::Signing,
            OrderStatus::Sending { .. } => StatusKind::Sending,
            OrderStatus::Completed { .. } => StatusKind::Completed,
            OrderStatus::Failed { .. } => StatusKind::Failed,
            OrderStatus::Refunding { .. } => StatusKind::Refunding,
            OrderStatus::Refunded { .. } => StatusKind::Refunded,
            OrderStatus::Expired => StatusKind::Expired,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Deposit transaction reference, once one has been observed.
    pub fn deposit_tx(&self) -> Option<&TxRef> {
        match self {
            OrderStatus::DepositDetected { deposit_tx }
            | OrderStatus::Confirming { deposit_tx, .. }
            | OrderStatus::Bridging { deposit_tx }
            | OrderStatus::Signing { deposit_tx }
            | OrderStatus::Sending { deposit_tx, .. }
            | OrderStatus::Completed { deposit_tx, .. } => Some(deposit_tx),
            _ => None,
        }
    }

    /// Withdrawal transaction reference, once one has been broadcast.
    pub fn withdrawal_tx(&self) -> Option<&TxRef> {
        match self {
            OrderStatus::Sending { withdrawal_tx, .. }
            | OrderStatus::Completed { withdrawal_tx, .. } => Some(withdrawal_tx),
            _ => None,
        }
    }

    /// Human-readable failure reason for the failure branches.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            OrderStatus::Failed { reason } | OrderStatus::Refunding { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Fieldless mirror of [`OrderStatus`] used for the transition table, the
/// step cursor, and store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Created,
    AwaitingDeposit,
    DepositDetected,
    Confirming,
    Bridging,
    Signing,
    Sending,
    Completed,
    Failed,
    Refunding,
    Refunded,
    Expired,
}

impl StatusKind {
    /// Integer progress cursor. Forward states count up; failure branches
    /// are negative so a step regression is immediately visible.
    pub fn step(&self) -> i16 {
        match self {
            Self::Created => 0,
            Self::AwaitingDeposit => 1,
            Self::DepositDetected => 2,
            Self::Confirming => 3,
            Self::Bridging => 4,
            Self::Signing => 5,
            Self::Sending => 6,
            Self::Completed => 7,
            Self::Failed => -1,
            Self::Refunding => -2,
            Self::Refunded => -3,
            Self::Expired => -4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Refunded | Self::Expired
        )
    }

    /// Valid next states from this state. `Expired` is reachable only from
    /// the pre-deposit states; post-deposit failures route through
    /// `Refunding` because funds have already been received.
    pub fn valid_transitions(&self) -> &'static [StatusKind] {
        match self {
            Self::Created => &[Self::AwaitingDeposit, Self::Expired, Self::Failed],
            Self::AwaitingDeposit => &[Self::DepositDetected, Self::Expired, Self::Failed],
            Self::DepositDetected => &[Self::Confirming, Self::Failed, Self::Refunding],
            Self::Confirming => &[Self::Bridging, Self::Failed, Self::Refunding],
            Self::Bridging => &[Self::Signing, Self::Failed, Self::Refunding],
            Self::Signing => &[Self::Sending, Self::Failed, Self::Refunding],
            Self::Sending => &[Self::Completed, Self::Failed, Self::Refunding],
            Self::Completed => &[],
            Self::Failed => &[Self::Refunding],
            Self::Refunding => &[Self::Refunded, Self::Failed],
            Self::Refunded => &[],
            Self::Expired => &[],
        }
    }

    pub fn can_transition_to(&self, next: StatusKind) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingDeposit => "awaiting_deposit",
            Self::DepositDetected => "deposit_detected",
            Self::Confirming => "confirming",
            Self::Bridging => "bridging",
            Self::Signing => "signing",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunding => "refunding",
            Self::Refunded => "refunded",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-initiated bridge request.
///
/// Mutated exclusively by the lifecycle controller; never physically
/// deleted. Terminal orders are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_id: OrderId,
    pub direction: Direction,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub rate_at_creation: Decimal,
    pub fee: Decimal,
    pub fee_percent: Decimal,
    pub slippage: Decimal,
    pub min_received: Decimal,
    pub dest_address: String,
    pub deposit_address: Option<String>,
    pub status: OrderStatus,
    pub confirmations_required: i32,
    pub signing_attempts: u32,
    pub metadata: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn kind(&self) -> StatusKind {
        self.status.kind()
    }

    pub fn step(&self) -> i16 {
        self.kind().step()
    }

    pub fn confirmations_current(&self) -> i32 {
        match &self.status {
            OrderStatus::Confirming { confirmations, .. } => *confirmations,
            s if s.kind().step() >= StatusKind::Bridging.step() && !s.kind().is_terminal() => {
                self.confirmations_required
            }
            OrderStatus::Completed { .. } => self.confirmations_required,
            _ => 0,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
