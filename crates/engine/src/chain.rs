//! Collaborator traits at the chain boundary.
//!
//! The engine never speaks a chain's wire format itself. Deposit address
//! allocation, transaction broadcast, and rate discovery sit behind these
//! traits; tests use in-process mocks and production wires in real clients.

use async_trait::async_trait;
use rust_decimal::Decimal;

use bridge_types::{Chain, Direction, OrderId, TxRef};

use crate::Result;

/// Access to the source and destination chains.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Allocate a fresh deposit address on `chain` for one order.
    async fn allocate_deposit_address(&self, chain: Chain, order_id: &OrderId) -> Result<String>;

    /// Broadcast a signed transaction and return its reference.
    async fn broadcast(&self, chain: Chain, signed_tx: &[u8]) -> Result<TxRef>;
}

/// Source of the conversion rate captured at order creation.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of the destination asset per one unit of the source asset.
    async fn rate(&self, direction: Direction) -> Result<Decimal>;
}
