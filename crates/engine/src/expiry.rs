//! Expiry supervisor.
//!
//! Periodically sweeps pre-deposit orders whose window has closed,
//! including orders stuck in `Created` because address allocation failed,
//! and routes each one through the lifecycle controller's `advance` entry
//! point. Because expiry is just another event under the per-order
//! lock, a deposit racing the sweep resolves to exactly one of the two
//! outcomes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{error, info, warn};

use bridge_types::{OrderEvent, StatusKind};

use crate::lifecycle::{LifecycleController, Outcome};

/// In-flight states checked for excessive residency.
const IN_FLIGHT: &[StatusKind] = &[
    StatusKind::DepositDetected,
    StatusKind::Confirming,
    StatusKind::Bridging,
    StatusKind::Signing,
    StatusKind::Sending,
    StatusKind::Refunding,
];

pub struct ExpirySupervisor {
    controller: Arc<LifecycleController>,
    interval: Duration,
    batch_size: usize,
    /// How long an order may sit in one in-flight state before it is
    /// escalated to the operator log.
    stale_after: chrono::Duration,
}

impl ExpirySupervisor {
    pub fn new(controller: Arc<LifecycleController>, interval: Duration, batch_size: usize) -> Self {
        Self {
            controller,
            interval,
            batch_size,
            stale_after: chrono::Duration::hours(6),
        }
    }

    pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Run the sweep loop indefinitely. Spawn as a background task.
    pub async fn start(self: Arc<Self>) {
        let mut interval = time::interval(self.interval);

        info!(interval = ?self.interval, "starting expiry supervisor");

        loop {
            interval.tick().await;

            match self.sweep_once().await {
                Ok(expired) if expired > 0 => {
                    info!(expired = expired, "expiry sweep complete");
                }
                Ok(_) => {}
                Err(e) => {
                    // Keep sweeping; stale orders are retried next tick.
                    error!(error = %e, "expiry sweep failed");
                }
            }
        }
    }

    /// One sweep pass. Returns how many orders were expired.
    pub async fn sweep_once(&self) -> crate::Result<usize> {
        let candidates = self.controller.expiry_candidates(self.batch_size).await?;
        let mut expired = 0;

        for order in candidates {
            match self.controller.advance(&order.order_id, OrderEvent::Expire).await {
                Ok(Outcome::Transitioned { .. }) => expired += 1,
                // A deposit won the race between the query and the lock.
                Ok(Outcome::Unchanged) => {}
                Err(e) => {
                    error!(order_id = %order.order_id, error = %e, "failed to expire order");
                }
            }
        }

        self.flag_stale_orders().await?;
        Ok(expired)
    }

    /// Orders stuck in one in-flight state past the residency limit are an
    /// operator problem, not something to resolve automatically.
    async fn flag_stale_orders(&self) -> crate::Result<()> {
        let cutoff = Utc::now() - self.stale_after;
        for kind in IN_FLIGHT {
            for order in self.controller.orders_with_status(*kind, self.batch_size).await? {
                if order.updated_at < cutoff {
                    warn!(order_id = %order.order_id, status = %kind,
                        updated_at = %order.updated_at,
                        "order exceeded residency limit, needs manual review");
                }
            }
        }
        Ok(())
    }

    /// Spawn the supervisor as a background task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.start().await;
        })
    }
}
