//! Prometheus metrics helpers for the hearth pipeline.
//!
//! This module provides centralized metrics initialization and the
//! descriptions for every metric the pipeline records. Components record
//! through the `metrics` facade at the point of the event; the ingest
//! daemon serves the rendered registry on its status endpoint.
//!
//! # Metric Naming Conventions
//!
//! - Prefix: pipeline stage (e.g. `hub_`, `extract_`, `enrich_`, `sink_`)
//! - Suffix: unit or type (e.g. `_total`, `_seconds`)
//! - Labels: used sparingly to avoid cardinality explosion

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded. Returns
/// a handle whose `render()` output the status server serves.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Register descriptions for every metric the pipeline records.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Stream client (hub connection)
    // =========================================================================

    describe_gauge!(
        "hub_connection_state",
        "Current connection state (0=disconnected, 1=connecting, 2=authenticating, 3=subscribed, 4=reconnecting)"
    );
    describe_counter!("hub_events_total", "Events received from the hub");
    describe_counter!("hub_frames_malformed_total", "Frames that failed to parse");
    describe_counter!("hub_reconnects_total", "Reconnection attempts after a drop");
    describe_counter!("hub_auth_failures_total", "Authentication rejections");
    describe_counter!(
        "hub_keepalive_timeouts_total",
        "Keepalive pings that received no pong within the timeout"
    );

    // =========================================================================
    // Extractor
    // =========================================================================

    describe_counter!("extract_events_total", "Events flattened successfully");
    describe_counter!(
        "extract_dropped_total",
        "Events dropped at extraction (label: reason)"
    );

    // =========================================================================
    // Enrichment gateway
    // =========================================================================

    describe_counter!("enrich_cache_hits_total", "Weather cache hits");
    describe_counter!("enrich_cache_misses_total", "Weather cache misses");
    describe_counter!(
        "enrich_provider_errors_total",
        "Weather provider fetch failures (event proceeds unenriched)"
    );
    describe_counter!(
        "enrich_forward_retries_total",
        "Retried hand-offs to the processing stage"
    );
    describe_counter!(
        "enrich_forward_failures_total",
        "Hand-offs that exhausted their retry budget"
    );
    describe_counter!(
        "enrich_forward_rejected_total",
        "Hand-offs rejected immediately because the breaker was open"
    );
    describe_gauge!(
        "breaker_state",
        "Circuit breaker state (0=closed, 1=open, 2=half-open)"
    );
    describe_counter!("breaker_open_total", "Times the circuit breaker opened");

    // =========================================================================
    // Validation & normalization
    // =========================================================================

    describe_counter!("validate_pass_total", "Events that passed validation");
    describe_counter!(
        "validate_reject_total",
        "Events rejected with structural errors"
    );
    describe_counter!(
        "validate_warnings_total",
        "Validation warnings on accepted events"
    );

    // =========================================================================
    // Batched store writer
    // =========================================================================

    describe_counter!("sink_events_written_total", "Rows written to the store");
    describe_counter!(
        "sink_batches_flushed_total",
        "Batches flushed successfully (label: reason)"
    );
    describe_counter!("sink_flush_retries_total", "Flush attempts that were retried");
    describe_counter!(
        "sink_batches_failed_total",
        "Batches dropped after exhausting flush retries"
    );
    describe_counter!(
        "sink_events_dropped_total",
        "Events lost in dropped batches"
    );
    describe_histogram!("sink_batch_size", "Events per flushed batch");
    describe_histogram!(
        "sink_flush_duration_seconds",
        "Time spent writing a batch to the store"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();
        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }
}
