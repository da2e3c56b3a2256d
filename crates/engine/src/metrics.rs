//! Prometheus metrics for the lifecycle engine.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    /// Total orders created
    pub static ref ORDERS_CREATED: IntCounter = register_int_counter!(
        "bridge_orders_created_total",
        "Total number of orders created"
    )
    .expect("Failed to register bridge_orders_created_total metric");

    /// Total orders expired by the supervisor or cancellation
    pub static ref ORDERS_EXPIRED: IntCounter = register_int_counter!(
        "bridge_orders_expired_total",
        "Total number of orders expired"
    )
    .expect("Failed to register bridge_orders_expired_total metric");

    /// Order state transitions (counter)
    pub static ref ORDER_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "bridge_order_transitions_total",
        "Total number of order state transitions",
        &["from", "to"]
    )
    .expect("Failed to register bridge_order_transitions_total metric");

    /// Threshold signing duration histogram (seconds)
    pub static ref SIGNING_DURATION: Histogram = register_histogram!(
        "bridge_signing_duration_seconds",
        "Threshold signing session duration in seconds"
    )
    .expect("Failed to register bridge_signing_duration_seconds metric");

    /// Signing sessions currently in flight
    pub static ref ACTIVE_SIGNING_SESSIONS: IntGauge = register_int_gauge!(
        "bridge_active_signing_sessions",
        "Number of signing sessions currently in flight"
    )
    .expect("Failed to register bridge_active_signing_sessions metric");

    /// Orders flagged for manual review (confirmation regressions)
    pub static ref MANUAL_REVIEW_FLAGS: IntCounter = register_int_counter!(
        "bridge_manual_review_flags_total",
        "Total number of orders flagged for manual review"
    )
    .expect("Failed to register bridge_manual_review_flags_total metric");
}
