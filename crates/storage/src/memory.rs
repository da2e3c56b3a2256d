//! In-memory store used by tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use bridge_types::{Chain, KeyCeremonyRecord, Order, OrderId, SignatureRequest, StatusKind};

use crate::{BridgeStore, Result, StorageError};

#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    signature_requests: RwLock<HashMap<Uuid, SignatureRequest>>,
    ceremonies: RwLock<HashMap<Chain, KeyCeremonyRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BridgeStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.order_id) {
            return Err(StorageError::Duplicate(order.order_id.to_string()));
        }
        orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(order_id).cloned())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if !orders.contains_key(&order.order_id) {
            return Err(StorageError::OrderNotFound(order.order_id.to_string()));
        }
        orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn orders_with_status(&self, kind: StatusKind, limit: usize) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matched: Vec<Order> = orders
            .values()
            .filter(|o| o.kind() == kind)
            .cloned()
            .collect();
        matched.sort_by_key(|o| o.created_at);
        matched.truncate(limit);
        Ok(matched)
    }

    async fn expiry_candidates(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matched: Vec<Order> = orders
            .values()
            .filter(|o| {
                matches!(o.kind(), StatusKind::Created | StatusKind::AwaitingDeposit)
                    && o.expires_at < now
            })
            .cloned()
            .collect();
        matched.sort_by_key(|o| o.expires_at);
        matched.truncate(limit);
        Ok(matched)
    }

    async fn insert_signature_request(&self, request: &SignatureRequest) -> Result<()> {
        let mut requests = self.signature_requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(StorageError::Duplicate(request.id.to_string()));
        }
        requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn update_signature_request(&self, request: &SignatureRequest) -> Result<()> {
        self.signature_requests
            .write()
            .await
            .insert(request.id, request.clone());
        Ok(())
    }

    async fn fetch_signature_request(&self, id: Uuid) -> Result<Option<SignatureRequest>> {
        Ok(self.signature_requests.read().await.get(&id).cloned())
    }

    async fn active_signature_request(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<SignatureRequest>> {
        Ok(self
            .signature_requests
            .read()
            .await
            .values()
            .find(|r| &r.order_id == order_id && r.status.is_active())
            .cloned())
    }

    async fn insert_ceremony(&self, ceremony: &KeyCeremonyRecord) -> Result<()> {
        let mut ceremonies = self.ceremonies.write().await;
        if ceremonies.contains_key(&ceremony.chain) {
            return Err(StorageError::Duplicate(ceremony.chain.to_string()));
        }
        ceremonies.insert(ceremony.chain, ceremony.clone());
        Ok(())
    }

    async fn update_ceremony(&self, ceremony: &KeyCeremonyRecord) -> Result<()> {
        self.ceremonies
            .write()
            .await
            .insert(ceremony.chain, ceremony.clone());
        Ok(())
    }

    async fn fetch_ceremony(&self, chain: Chain) -> Result<Option<KeyCeremonyRecord>> {
        Ok(self.ceremonies.read().await.get(&chain).cloned())
    }
}
