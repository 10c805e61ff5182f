// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for record-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `record_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `entity`: leads, activities, products, orders, product-variants
//! - `operation`: load, create, update, delete, delete_many
//! - `status`: success, error, rejected, rolled_back

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a sync operation outcome
pub fn record_operation(entity: &str, operation: &str, status: &str) {
    counter!(
        "record_sync_operations_total",
        "entity" => entity.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_operation_latency(entity: &str, operation: &str, duration: Duration) {
    histogram!(
        "record_sync_operation_seconds",
        "entity" => entity.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a retry attempt
pub fn record_retry(entity: &str, attempt: u32) {
    counter!(
        "record_sync_retries_total",
        "entity" => entity.to_string()
    )
    .increment(1);
    gauge!(
        "record_sync_last_retry_attempt",
        "entity" => entity.to_string()
    )
    .set(f64::from(attempt));
}

/// Record an optimistic rollback
pub fn record_rollback(entity: &str, operation: &str) {
    counter!(
        "record_sync_rollbacks_total",
        "entity" => entity.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record an invalidation broadcast and its audience size
pub fn record_invalidation(entity: &str, listeners: usize) {
    counter!(
        "record_sync_invalidations_total",
        "entity" => entity.to_string()
    )
    .increment(1);
    histogram!("record_sync_invalidation_listeners").record(listeners as f64);
}

/// Record a periodic resync tick (status: success, skipped, error)
pub fn record_resync_tick(target: &str, status: &str) {
    counter!(
        "record_sync_resync_ticks_total",
        "target" => target.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a partial bulk delete (items the server failed to delete)
pub fn record_partial_delete(entity: &str, missing: usize) {
    counter!(
        "record_sync_partial_deletes_total",
        "entity" => entity.to_string()
    )
    .increment(missing as u64);
}

/// Set current canonical collection size
pub fn set_collection_size(entity: &str, count: usize) {
    gauge!(
        "record_sync_collection_items",
        "entity" => entity.to_string()
    )
    .set(count as f64);
}
