//! Order lifecycle engine.
//!
//! [`LifecycleController`] is the only component that mutates orders. Every
//! mutation goes through a per-order lock, is precondition-checked against
//! the current status so at-least-once event delivery cannot double-apply,
//! and writes its audit entry before any external side effect.
//!
//! [`ExpirySupervisor`] sweeps stale deposit windows on an interval and
//! routes each candidate through the same entry point, so an expiry and a
//! racing deposit resolve to exactly one of the two outcomes.

pub mod chain;
pub mod config;
pub mod expiry;
pub mod lifecycle;
pub mod metrics;

pub use chain::{ChainClient, RateSource};
pub use config::EngineConfig;
pub use expiry::ExpirySupervisor;
pub use lifecycle::{CreateOrderRequest, LifecycleController, Outcome};

use bridge_types::{Chain, OrderId, StatusKind};
use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unsupported direction: {0}")]
    UnsupportedDirection(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid {chain} address: {address}")]
    InvalidAddress { chain: Chain, address: String },

    #[error("slippage {0}% out of bounds")]
    InvalidSlippage(Decimal),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {order_id} is {got}, expected {expected}")]
    WrongState {
        order_id: OrderId,
        expected: StatusKind,
        got: StatusKind,
    },

    #[error("order {order_id} cannot be cancelled in state {kind}")]
    NotCancellable { order_id: OrderId, kind: StatusKind },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("chain client error: {0}")]
    Chain(String),

    #[error(transparent)]
    Signing(#[from] bridge_signing::SigningError),

    #[error(transparent)]
    Storage(#[from] bridge_storage::StorageError),

    #[error(transparent)]
    Audit(#[from] bridge_audit::AuditError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
