//! Metrics for the matching engine.
//!
//! Provides Prometheus-compatible metrics for monitoring:
//! - Order submission/cancellation/rejection counts
//! - Matching and settlement latency and outcomes
//! - Per-pair order book depth
//! - History service query latency
//! - Journal/snapshot persistence

#![allow(dead_code)]

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Metric names as constants for consistency
pub mod names {
    // Order lifecycle
    pub const ORDERS_SUBMITTED_TOTAL: &str = "orders_submitted_total";
    pub const ORDERS_REJECTED_TOTAL: &str = "orders_rejected_total";
    pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";
    pub const ORDER_VALIDATION_DURATION_SECONDS: &str = "order_validation_duration_seconds";

    // Matching engine
    pub const TRADES_EXECUTED_TOTAL: &str = "trades_executed_total";
    pub const TRADE_VOLUME_TOTAL: &str = "trade_volume_total";
    pub const ORDER_MATCH_DURATION_SECONDS: &str = "order_match_duration_seconds";
    pub const DUST_RESIDUALS_TOTAL: &str = "dust_residuals_total";

    // Settlement
    pub const SETTLEMENT_SUBMISSIONS_TOTAL: &str = "settlement_submissions_total";
    pub const SETTLEMENT_REJECTIONS_TOTAL: &str = "settlement_rejections_total";

    // Order book / dispatcher
    pub const ORDERBOOK_DEPTH: &str = "orderbook_depth";
    pub const ACTIVE_PAIRS: &str = "active_pairs";
    pub const CONTROLLERS_SPAWNED_TOTAL: &str = "controllers_spawned_total";

    // History service
    pub const HISTORY_QUERY_DURATION_SECONDS: &str = "history_query_duration_seconds";
    pub const HISTORY_REQUESTS_DROPPED_TOTAL: &str = "history_requests_dropped_total";

    // Persistence
    pub const JOURNAL_WRITE_DURATION_SECONDS: &str = "journal_write_duration_seconds";
    pub const SNAPSHOT_WRITE_DURATION_SECONDS: &str = "snapshot_write_duration_seconds";
    pub const SNAPSHOT_WRITE_FAILURES_TOTAL: &str = "snapshot_write_failures_total";
}

/// Label keys
pub mod labels {
    pub const PAIR: &str = "pair";
    pub const ORDER_SIDE: &str = "side";
    pub const REASON: &str = "reason";
    pub const QUERY_TYPE: &str = "query_type";
}

/// Initialize Prometheus metrics exporter
///
/// Returns a handle that can be used to render metrics
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new()
        // Order matching duration buckets (in seconds) - should be fast, it
        // runs synchronously inside the controller's actor loop.
        .set_buckets_for_metric(
            Matcher::Full(names::ORDER_MATCH_DURATION_SECONDS.to_string()),
            &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5],
        )
        .unwrap()
        // Validation runs concurrently with matching but is on the hot path
        // of every submission.
        .set_buckets_for_metric(
            Matcher::Full(names::ORDER_VALIDATION_DURATION_SECONDS.to_string()),
            &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0],
        )
        .unwrap()
        .set_buckets_for_metric(
            Matcher::Full(names::HISTORY_QUERY_DURATION_SECONDS.to_string()),
            &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1],
        )
        .unwrap()
        .set_buckets_for_metric(
            Matcher::Full(names::JOURNAL_WRITE_DURATION_SECONDS.to_string()),
            &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05],
        )
        .unwrap();

    builder
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

// ============================================================================
// Order lifecycle
// ============================================================================

pub fn record_order_submitted(pair: &str, side: &str) {
    counter!(
        names::ORDERS_SUBMITTED_TOTAL,
        labels::PAIR => pair.to_string(),
        labels::ORDER_SIDE => side.to_string()
    )
    .increment(1);
}

pub fn record_order_rejected(reason: &str) {
    counter!(
        names::ORDERS_REJECTED_TOTAL,
        labels::REASON => reason.to_string()
    )
    .increment(1);
}

pub fn record_order_cancelled(pair: &str) {
    counter!(
        names::ORDERS_CANCELLED_TOTAL,
        labels::PAIR => pair.to_string()
    )
    .increment(1);
}

pub fn record_validation_duration(duration_secs: f64) {
    histogram!(names::ORDER_VALIDATION_DURATION_SECONDS).record(duration_secs);
}

// ============================================================================
// Matching engine
// ============================================================================

pub fn record_trade_executed(pair: &str, amount: u64) {
    counter!(
        names::TRADES_EXECUTED_TOTAL,
        labels::PAIR => pair.to_string()
    )
    .increment(1);

    counter!(
        names::TRADE_VOLUME_TOTAL,
        labels::PAIR => pair.to_string()
    )
    .increment(amount);
}

pub fn record_order_match_duration(duration_secs: f64) {
    histogram!(names::ORDER_MATCH_DURATION_SECONDS).record(duration_secs);
}

pub fn record_dust_residual(pair: &str) {
    counter!(
        names::DUST_RESIDUALS_TOTAL,
        labels::PAIR => pair.to_string()
    )
    .increment(1);
}

// ============================================================================
// Settlement
// ============================================================================

pub fn record_settlement_submission(pair: &str) {
    counter!(
        names::SETTLEMENT_SUBMISSIONS_TOTAL,
        labels::PAIR => pair.to_string()
    )
    .increment(1);
}

pub fn record_settlement_rejection(pair: &str) {
    counter!(
        names::SETTLEMENT_REJECTIONS_TOTAL,
        labels::PAIR => pair.to_string()
    )
    .increment(1);
}

// ============================================================================
// Order book / dispatcher
// ============================================================================

pub fn set_orderbook_depth(pair: &str, side: &str, depth: i64) {
    gauge!(
        names::ORDERBOOK_DEPTH,
        labels::PAIR => pair.to_string(),
        labels::ORDER_SIDE => side.to_string()
    )
    .set(depth as f64);
}

pub fn set_active_pairs(count: i64) {
    gauge!(names::ACTIVE_PAIRS).set(count as f64);
}

pub fn record_controller_spawned() {
    counter!(names::CONTROLLERS_SPAWNED_TOTAL).increment(1);
}

// ============================================================================
// History service
// ============================================================================

pub fn record_history_query(query_type: &str, duration_secs: f64) {
    histogram!(
        names::HISTORY_QUERY_DURATION_SECONDS,
        labels::QUERY_TYPE => query_type.to_string()
    )
    .record(duration_secs);
}

pub fn record_history_request_dropped(reason: &str) {
    counter!(
        names::HISTORY_REQUESTS_DROPPED_TOTAL,
        labels::REASON => reason.to_string()
    )
    .increment(1);
}

// ============================================================================
// Persistence
// ============================================================================

pub fn record_journal_write(duration_secs: f64) {
    histogram!(names::JOURNAL_WRITE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_snapshot_write(duration_secs: f64) {
    histogram!(names::SNAPSHOT_WRITE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_snapshot_write_failure() {
    counter!(names::SNAPSHOT_WRITE_FAILURES_TOTAL).increment(1);
}

// ============================================================================
// Timer Helper
// ============================================================================

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Get elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
