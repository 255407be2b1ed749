// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for ranked-store.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding service is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `ranked_store_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `layer`: service, store, cache, audit
//! - `operation`: list, get, create, update, delete, reprioritize
//! - `status`: success, error, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a finished service operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "ranked_store_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(layer: &str, operation: &str, duration: Duration) {
    histogram!(
        "ranked_store_operation_seconds",
        "layer" => layer.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(layer: &str, operation: &str, error_type: &str) {
    counter!(
        "ranked_store_errors_total",
        "layer" => layer.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a timeout error
pub fn record_timeout(layer: &str, operation: &str) {
    counter!(
        "ranked_store_timeouts_total",
        "layer" => layer.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIST CACHE - Hit rate and invalidation
// ═══════════════════════════════════════════════════════════════════════════

/// Record a listing cache lookup (`hit`, `miss`, `error`)
pub fn record_cache_lookup(outcome: &'static str) {
    counter!(
        "ranked_store_list_cache_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a listing cache invalidation and how many pages it dropped
pub fn record_cache_invalidation(purged: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "ranked_store_list_cache_invalidations_total",
        "status" => status
    )
    .increment(1);
    if success {
        counter!("ranked_store_list_cache_purged_pages_total").increment(purged as u64);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RANKING - Renumber fan-out
// ═══════════════════════════════════════════════════════════════════════════

/// Record how many rows a reprioritize touched
pub fn record_renumbered(count: usize) {
    histogram!("ranked_store_renumbered_rows").record(count as f64);
}

/// Set the last observed row totals
pub fn set_row_counts(total: i64, removed: i64) {
    gauge!("ranked_store_rows").set(total as f64);
    gauge!("ranked_store_removed_rows").set(removed as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// AUDIT - Change event publishing
// ═══════════════════════════════════════════════════════════════════════════

/// Record an audit event publish attempt
pub fn record_audit_event(topic: &str, status: &'static str) {
    counter!(
        "ranked_store_audit_events_total",
        "topic" => topic.to_string(),
        "status" => status
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKEND HEALTH - Connection status
// ═══════════════════════════════════════════════════════════════════════════

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "ranked_store_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Record startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "ranked_store_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    layer: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(layer: &'static str, operation: &'static str) -> Self {
        Self {
            layer,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.layer, self.operation, self.start.elapsed());
    }
}
