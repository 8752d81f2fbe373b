// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the lead sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The host app
//! chooses the exporter (or none).
//!
//! # Metric Naming Convention
//! - `lead_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `trigger`: manual, scheduled, resume, pull_to_refresh, status_update
//! - `outcome`: success, error, throttled, skipped_offline, ...
//! - `source`: network, cache, miss, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::lead::RecordRejection;

/// Record a finished sync session
pub fn record_sync_session(trigger: &str, outcome: &str) {
    counter!(
        "lead_sync_sessions_total",
        "trigger" => trigger.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record wall time of a sync session that actually ran
pub fn record_sync_duration(duration: Duration) {
    histogram!("lead_sync_session_seconds").record(duration.as_secs_f64());
}

/// Coordinator state (0 = Idle, 1 = Syncing, 2 = Throttled, 3 = Error)
pub fn set_sync_state(state: u8) {
    gauge!("lead_sync_coordinator_state").set(f64::from(state));
}

/// Record a pagination `load_next` outcome
pub fn record_page_load(outcome: &str) {
    counter!(
        "lead_sync_page_loads_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a by-id lookup resolution
pub fn record_lookup(source: &str) {
    counter!(
        "lead_sync_lookups_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record a durable store operation latency
pub fn record_store_latency(operation: &str, duration: Duration) {
    histogram!(
        "lead_sync_store_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a durable store failure
pub fn record_store_error(operation: &str) {
    counter!(
        "lead_sync_store_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a remote payload dropped by validation
pub fn record_rejected_record(reason: &RecordRejection) {
    let reason = match reason {
        RecordRejection::NotAnObject => "not_an_object",
        RecordRejection::MissingId => "missing_id",
        RecordRejection::MissingField(_) => "missing_field",
        RecordRejection::InvalidField { .. } => "invalid_field",
    };
    counter!(
        "lead_sync_rejected_records_total",
        "reason" => reason
    )
    .increment(1);
}

/// Set cache size gauges
pub fn set_cache_stats(records: usize, pages_loaded: usize) {
    gauge!("lead_sync_cache_records").set(records as f64);
    gauge!("lead_sync_cache_pages_loaded").set(pages_loaded as f64);
}

/// A timing guard that records store latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_store_latency(self.operation, self.start.elapsed());
    }
}
