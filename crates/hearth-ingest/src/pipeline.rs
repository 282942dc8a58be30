//! Pipeline wiring: stage tasks and the queues between them.
//!
//! ```text
//! ┌───────────┐   RawEvent    ┌───────────────────┐   FlatEvent   ┌──────────────────┐
//! │ HubClient │──────────────▶│ extract + forward │──────────────▶│ enrich/validate/ │
//! └───────────┘  (bounded)    │ (circuit breaker) │   (bounded)   │ normalize + push │
//!                             └───────────────────┘               └────────┬─────────┘
//!                                                                          ▼
//!                                                                   ┌─────────────┐
//!                                                                   │ BatchWriter │──▶ store
//!                                                                   └─────────────┘
//! ```
//!
//! Stages are independently scheduled tasks; only network calls suspend.
//! Shutdown is drain-based: when the hub client stops, its sender drops,
//! each stage finishes its queue and drops its own sender, and the
//! processing stage ends with a final flush.

use crate::enrich::{EnrichmentGateway, WeatherCache, WeatherProvider};
use crate::sink::{BatchWriter, FlushReason, StateStore};
use crate::{extract, validate};
use hearth_core::event::EnrichedEvent;
use hearth_core::{FlatEvent, RawEvent};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};

/// Counters for the extraction and validation stages, exposed on the
/// health surface.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub extracted: AtomicU64,
    pub extract_dropped: AtomicU64,
    pub forward_failed: AtomicU64,
    pub validated: AtomicU64,
    pub rejected: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            extracted: self.extracted.load(Ordering::Relaxed),
            extract_dropped: self.extract_dropped.load(Ordering::Relaxed),
            forward_failed: self.forward_failed.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatsSnapshot {
    pub extracted: u64,
    pub extract_dropped: u64,
    pub forward_failed: u64,
    pub validated: u64,
    pub rejected: u64,
}

/// Extraction stage: flatten raw envelopes and hand them to the gateway.
///
/// Runs until the raw queue closes. Extraction failures drop the event (the
/// same malformed envelope will not become well-formed); forwarding
/// failures are the gateway's concern and only logged here.
pub async fn run_extract_stage(
    mut raw_rx: mpsc::Receiver<RawEvent>,
    gateway: EnrichmentGateway,
    stats: Arc<PipelineStats>,
) {
    while let Some(raw) = raw_rx.recv().await {
        let flat = match extract::flatten(raw) {
            Ok(flat) => flat,
            Err(e) => {
                stats.extract_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "dropping unextractable event");
                continue;
            }
        };
        stats.extracted.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = gateway.forward(flat).await {
            stats.forward_failed.fetch_add(1, Ordering::Relaxed);
            match e {
                crate::Error::CircuitOpen => {
                    tracing::debug!("processing stage hand-off short-circuited");
                }
                other => {
                    tracing::warn!(error = %other, "failed to hand event to processing stage");
                }
            }
        }
    }
    tracing::info!("extract stage finished");
}

/// Processing stage: enrich, validate, normalize, and buffer for writing.
///
/// Runs until the flat queue closes, then performs the final drain flush.
pub async fn run_process_stage<P: WeatherProvider, S: StateStore>(
    mut flat_rx: mpsc::Receiver<FlatEvent>,
    cache: Option<Arc<WeatherCache<P>>>,
    writer: Arc<BatchWriter<S>>,
    stats: Arc<PipelineStats>,
) {
    while let Some(flat) = flat_rx.recv().await {
        let report = validate::validate(&flat);

        if !report.warnings.is_empty() {
            metrics::counter!("validate_warnings_total").increment(report.warnings.len() as u64);
            tracing::debug!(
                entity_id = %flat.entity_id,
                warnings = ?report.warnings,
                "validation warnings"
            );
        }

        if !report.is_valid {
            stats.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("validate_reject_total").increment(1);
            tracing::warn!(
                entity_id = %flat.entity_id,
                errors = ?report.errors,
                "rejecting invalid event"
            );
            continue;
        }
        stats.validated.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("validate_pass_total").increment(1);

        // Enrichment is best-effort: a cache/provider failure yields an
        // unenriched event, never a dropped one.
        let weather = match &cache {
            Some(cache) => cache.current().await,
            None => None,
        };

        let normalized = crate::normalize::normalize(EnrichedEvent {
            event: flat,
            weather,
        });
        writer.push(normalized).await;
    }

    // Input closed: drain what is buffered before the task ends.
    writer.flush(FlushReason::Shutdown).await;
    tracing::info!("process stage finished");
}

/// Flush ticker: drives the writer's timer deadline.
///
/// Sleeps until the writer's next deadline and flushes whatever is due.
/// Because the deadline moves on every flush, a size-triggered flush pushes
/// the next timer flush a full interval out.
pub async fn run_flush_timer<S: StateStore>(
    writer: Arc<BatchWriter<S>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let deadline = tokio::time::Instant::from_std(writer.next_deadline());
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                writer.flush_if_due().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("flush timer finished");
}
