// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the query engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for installing a recorder.
//!
//! # Metric Naming Convention
//! - `query_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, histogram};
use std::time::Duration;

/// Record one `order`/`search`/`search_any` compilation
pub fn record_compile(operation: &str, semantic_type: &str) {
    counter!(
        "query_engine_compile_total",
        "operation" => operation.to_string(),
        "semantic_type" => semantic_type.to_string()
    )
    .increment(1);
}

/// Record a key-translation pluck against the store
pub fn record_pluck(table: &str, rows: usize, duration: Duration) {
    counter!("query_engine_pluck_total", "table" => table.to_string()).increment(1);
    histogram!("query_engine_pluck_rows", "table" => table.to_string()).record(rows as f64);
    histogram!("query_engine_pluck_seconds", "table" => table.to_string())
        .record(duration.as_secs_f64());
}

/// Record the outcome of a sandboxed scope probe: "scope", "value", "error" or "missing"
pub fn record_scope_probe(outcome: &str) {
    counter!("query_engine_scope_probe_total", "outcome" => outcome.to_string()).increment(1);
}
