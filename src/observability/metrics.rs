//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bucket_operations_total` (counter): terminal outcomes by op, outcome
//! - `bucket_operation_duration_seconds` (histogram): submit-to-terminal latency
//! - `bucket_operation_timeouts_total` (counter): expired waits by op
//! - `bucket_operation_cancellations_total` (counter): explicit cancels by op
//! - `bucket_submit_failures_total` (counter): engine rejections by op
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users
//!   that never call [`init_metrics`] pay only for the macro lookups
//! - Labels use static operation names to keep cardinality fixed

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a terminal outcome and its latency.
pub fn record_operation(op: &'static str, outcome: &'static str, started: Instant) {
    counter!("bucket_operations_total", "op" => op, "outcome" => outcome).increment(1);
    histogram!("bucket_operation_duration_seconds", "op" => op)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_timeout(op: &'static str) {
    counter!("bucket_operation_timeouts_total", "op" => op).increment(1);
}

pub fn record_cancellation(op: &'static str) {
    counter!("bucket_operation_cancellations_total", "op" => op).increment(1);
}

pub fn record_submit_failure(op: &'static str) {
    counter!("bucket_submit_failures_total", "op" => op).increment(1);
}
