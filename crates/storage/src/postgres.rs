//! PostgreSQL-backed store.
//!
//! Rows carry a handful of queryable columns (id, status, timestamps) plus
//! the full domain record as a JSONB document, so schema churn in the
//! domain model does not require a migration for every added field.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::info;
use uuid::Uuid;

use bridge_types::{Chain, KeyCeremonyRecord, Order, OrderId, SignatureRequest, StatusKind};

use crate::{BridgeStore, Result, StorageError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bridge_orders (
    order_id    TEXT PRIMARY KEY,
    status      TEXT NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL,
    doc         JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS bridge_orders_status_idx
    ON bridge_orders (status, created_at);

CREATE TABLE IF NOT EXISTS signature_requests (
    id          TEXT PRIMARY KEY,
    order_id    TEXT NOT NULL REFERENCES bridge_orders (order_id),
    active      BOOLEAN NOT NULL,
    doc         JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS signature_requests_order_idx
    ON signature_requests (order_id, active);

CREATE TABLE IF NOT EXISTS key_ceremonies (
    chain       TEXT PRIMARY KEY,
    doc         JSONB NOT NULL
);
"#;

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Build a pooled store from a libpq-style connection string.
    pub fn connect(conn_str: &str, max_size: usize) -> Result<Self> {
        let pg_config: tokio_postgres::Config = conn_str.parse()?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .build()
            .map_err(|e| StorageError::PoolConfig(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        info!("postgres schema initialised");
        Ok(())
    }
}

#[async_trait]
impl BridgeStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let client = self.pool.get().await?;
        let doc = serde_json::to_value(order)?;
        let rows = client
            .execute(
                "INSERT INTO bridge_orders (order_id, status, expires_at, created_at, doc) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (order_id) DO NOTHING",
                &[
                    &order.order_id.as_str(),
                    &order.kind().as_str(),
                    &order.expires_at,
                    &order.created_at,
                    &doc,
                ],
            )
            .await?;
        if rows == 0 {
            return Err(StorageError::Duplicate(order.order_id.to_string()));
        }
        Ok(())
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT doc FROM bridge_orders WHERE order_id = $1",
                &[&order_id.as_str()],
            )
            .await?;
        row.map(|r| serde_json::from_value(r.get(0)).map_err(StorageError::from))
            .transpose()
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let client = self.pool.get().await?;
        let doc = serde_json::to_value(order)?;
        let rows = client
            .execute(
                "UPDATE bridge_orders SET status = $2, expires_at = $3, doc = $4 \
                 WHERE order_id = $1",
                &[
                    &order.order_id.as_str(),
                    &order.kind().as_str(),
                    &order.expires_at,
                    &doc,
                ],
            )
            .await?;
        if rows == 0 {
            return Err(StorageError::OrderNotFound(order.order_id.to_string()));
        }
        Ok(())
    }

    async fn orders_with_status(&self, kind: StatusKind, limit: usize) -> Result<Vec<Order>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT doc FROM bridge_orders WHERE status = $1 \
                 ORDER BY created_at ASC LIMIT $2",
                &[&kind.as_str(), &(limit as i64)],
            )
            .await?;
        rows.into_iter()
            .map(|r| serde_json::from_value(r.get(0)).map_err(StorageError::from))
            .collect()
    }

    async fn expiry_candidates(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT doc FROM bridge_orders \
                 WHERE status IN ('created', 'awaiting_deposit') AND expires_at < $1 \
                 ORDER BY expires_at ASC LIMIT $2",
                &[&now, &(limit as i64)],
            )
            .await?;
        rows.into_iter()
            .map(|r| serde_json::from_value(r.get(0)).map_err(StorageError::from))
            .collect()
    }

    async fn insert_signature_request(&self, request: &SignatureRequest) -> Result<()> {
        let client = self.pool.get().await?;
        let doc = serde_json::to_value(request)?;
        let rows = client
            .execute(
                "INSERT INTO signature_requests (id, order_id, active, doc) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO NOTHING",
                &[
                    &request.id.to_string(),
                    &request.order_id.as_str(),
                    &request.status.is_active(),
                    &doc,
                ],
            )
            .await?;
        if rows == 0 {
            return Err(StorageError::Duplicate(request.id.to_string()));
        }
        Ok(())
    }

    async fn update_signature_request(&self, request: &SignatureRequest) -> Result<()> {
        let client = self.pool.get().await?;
        let doc = serde_json::to_value(request)?;
        client
            .execute(
                "UPDATE signature_requests SET active = $2, doc = $3 WHERE id = $1",
                &[&request.id.to_string(), &request.status.is_active(), &doc],
            )
            .await?;
        Ok(())
    }

    async fn fetch_signature_request(&self, id: Uuid) -> Result<Option<SignatureRequest>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT doc FROM signature_requests WHERE id = $1",
                &[&id.to_string()],
            )
            .await?;
        row.map(|r| serde_json::from_value(r.get(0)).map_err(StorageError::from))
            .transpose()
    }

    async fn active_signature_request(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<SignatureRequest>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT doc FROM signature_requests \
                 WHERE order_id = $1 AND active LIMIT 1",
                &[&order_id.as_str()],
            )
            .await?;
        row.map(|r| serde_json::from_value(r.get(0)).map_err(StorageError::from))
            .transpose()
    }

    async fn insert_ceremony(&self, ceremony: &KeyCeremonyRecord) -> Result<()> {
        let client = self.pool.get().await?;
        let doc = serde_json::to_value(ceremony)?;
        let rows = client
            .execute(
                "INSERT INTO key_ceremonies (chain, doc) VALUES ($1, $2) \
                 ON CONFLICT (chain) DO NOTHING",
                &[&ceremony.chain.as_str(), &doc],
            )
            .await?;
        if rows == 0 {
            return Err(StorageError::Duplicate(ceremony.chain.to_string()));
        }
        Ok(())
    }

    async fn update_ceremony(&self, ceremony: &KeyCeremonyRecord) -> Result<()> {
        let client = self.pool.get().await?;
        let doc = serde_json::to_value(ceremony)?;
        client
            .execute(
                "UPDATE key_ceremonies SET doc = $2 WHERE chain = $1",
                &[&ceremony.chain.as_str(), &doc],
            )
            .await?;
        Ok(())
    }

    async fn fetch_ceremony(&self, chain: Chain) -> Result<Option<KeyCeremonyRecord>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT doc FROM key_ceremonies WHERE chain = $1",
                &[&chain.as_str()],
            )
            .await?;
        row.map(|r| serde_json::from_value(r.get(0)).map_err(StorageError::from))
            .transpose()
    }
}
