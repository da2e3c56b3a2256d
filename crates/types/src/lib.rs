//! Shared domain types for the bridge coordination core.
//!
//! Everything that crosses a crate boundary lives here: the order model and
//! its status machine, chain identifiers, lifecycle events, signature-request
//! and key-ceremony records, address validation, and conversion math.

pub mod chain;
pub mod event;
pub mod mpc;
pub mod order;
pub mod quote;
pub mod validation;

pub use chain::{Chain, Direction};
pub use event::OrderEvent;
pub use mpc::{CeremonyStatus, KeyCeremonyRecord, SignatureRequest, SignatureStatus};
pub use order::{Order, OrderId, OrderStatus, StatusKind, TxRef};
pub use quote::{calculate_conversion, Quote};
pub use validation::validate_address;

/// Errors shared across the domain model.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: StatusKind, to: StatusKind },
}
