//! Durable state for the bridge core: orders, signature requests, and key
//! ceremonies, behind one async store trait.
//!
//! Two backends: [`MemoryStore`] for tests and single-process runs, and
//! [`PostgresStore`] for production deployments.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use bridge_types::{Chain, KeyCeremonyRecord, Order, OrderId, SignatureRequest, StatusKind};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("pool configuration error: {0}")]
    PoolConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable table layout from the design: orders keyed by order id,
/// append-only audit entries (owned by `bridge-audit`), signature requests
/// foreign-keyed to orders, key ceremonies keyed by chain.
#[async_trait]
pub trait BridgeStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<()>;
    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>>;
    async fn update_order(&self, order: &Order) -> Result<()>;
    /// Orders currently in the given status, oldest first.
    async fn orders_with_status(&self, kind: StatusKind, limit: usize) -> Result<Vec<Order>>;
    /// Orders still awaiting a deposit whose expiry timestamp has passed.
    async fn expiry_candidates(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>>;

    async fn insert_signature_request(&self, request: &SignatureRequest) -> Result<()>;
    async fn update_signature_request(&self, request: &SignatureRequest) -> Result<()>;
    async fn fetch_signature_request(&self, id: Uuid) -> Result<Option<SignatureRequest>>;
    /// The at-most-one signature request for this order that is still
    /// pending or collecting.
    async fn active_signature_request(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<SignatureRequest>>;

    async fn insert_ceremony(&self, ceremony: &KeyCeremonyRecord) -> Result<()>;
    async fn update_ceremony(&self, ceremony: &KeyCeremonyRecord) -> Result<()>;
    async fn fetch_ceremony(&self, chain: Chain) -> Result<Option<KeyCeremonyRecord>>;
}
