//! Batched store writer.
//!
//! Accumulates normalized events into an ordered batch and flushes to the
//! store when either the count threshold or the flush timer fires, whichever
//! first. The timer is deadline-based: reset on every flush, never on
//! insert. A failed flush is retried a bounded number of times with backoff;
//! if every attempt fails the batch is logged loudly and dropped, keeping
//! the pipeline live instead of growing memory without bound.

mod clickhouse;

pub use clickhouse::{ClickHouseConfig, ClickHouseStore, StateRow, StateStore};

use hearth_core::NormalizedEvent;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Configuration for the batched writer.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush when the batch reaches this many events.
    pub max_batch_size: usize,

    /// Flush when this much time has passed since the last flush.
    pub flush_interval: Duration,

    /// Total write attempts per batch before dropping it.
    pub max_flush_attempts: u32,

    /// Delay before the first write retry; doubles per attempt.
    pub retry_base: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_flush_attempts: 3,
            retry_base: Duration::from_millis(500),
        }
    }
}

/// What triggered a flush; recorded as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Timer,
    Shutdown,
}

impl FlushReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Timer => "timer",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Outcome of one flush call. Failures are fully handled inside the writer;
/// callers only need the outcome for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing buffered; the timer was still reset.
    Empty,
    /// The batch was written.
    Flushed(usize),
    /// Every attempt failed; the batch was dropped.
    Dropped(usize),
}

/// Counters exposed on the health surface.
#[derive(Debug, Default)]
pub struct WriterStats {
    pub events_written: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub batches_failed: AtomicU64,
    pub events_dropped: AtomicU64,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            events_written: self.events_written.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WriterStats`].
#[derive(Debug, Clone, Serialize)]
pub struct WriterStatsSnapshot {
    pub events_written: u64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    pub events_dropped: u64,
}

/// The batched store writer.
///
/// The accumulating batch is mutated by the event-processing path and
/// swapped out by the flush path; both go through one mutex, and the lock
/// is never held across a store write.
pub struct BatchWriter<S> {
    store: S,
    config: BatchConfig,
    batch: Mutex<Vec<NormalizedEvent>>,
    last_flush: Mutex<Instant>,
    stats: Arc<WriterStats>,
}

impl<S: StateStore> BatchWriter<S> {
    pub fn new(store: S, config: BatchConfig) -> Self {
        Self {
            store,
            config,
            batch: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
            stats: Arc::new(WriterStats::default()),
        }
    }

    /// Shared handle to the writer's counters.
    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }

    /// Number of events currently buffered.
    pub fn pending(&self) -> usize {
        self.batch.lock().len()
    }

    /// When the flush timer next fires: one interval after the last flush.
    pub fn next_deadline(&self) -> Instant {
        *self.last_flush.lock() + self.config.flush_interval
    }

    /// Append an event, flushing immediately if the batch is full.
    pub async fn push(&self, event: NormalizedEvent) {
        let full = {
            let mut batch = self.batch.lock();
            batch.push(event);
            batch.len() >= self.config.max_batch_size
        };
        if full {
            self.flush(FlushReason::Size).await;
        }
    }

    /// Flush if the timer deadline has passed. Called by the pipeline's
    /// flush ticker.
    pub async fn flush_if_due(&self) -> FlushOutcome {
        if Instant::now() >= self.next_deadline() {
            self.flush(FlushReason::Timer).await
        } else {
            FlushOutcome::Empty
        }
    }

    /// Swap the accumulated batch out and write it, retrying transient
    /// failures. Resets the flush timer on every path.
    pub async fn flush(&self, reason: FlushReason) -> FlushOutcome {
        let batch = {
            let mut batch = self.batch.lock();
            if batch.is_empty() {
                *self.last_flush.lock() = Instant::now();
                return FlushOutcome::Empty;
            }
            std::mem::take(&mut *batch)
        };

        // Arrival order within the batch is preserved: rows are converted
        // and written in insertion order.
        let rows: Vec<StateRow> = batch.iter().map(StateRow::from).collect();
        let count = rows.len();

        let mut delay = self.config.retry_base;
        let mut attempt = 1u32;
        let started = Instant::now();
        loop {
            match self.store.write_points(&rows).await {
                Ok(()) => {
                    *self.last_flush.lock() = Instant::now();
                    self.stats
                        .events_written
                        .fetch_add(count as u64, Ordering::Relaxed);
                    self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("sink_events_written_total").increment(count as u64);
                    metrics::counter!("sink_batches_flushed_total", "reason" => reason.as_str())
                        .increment(1);
                    metrics::histogram!("sink_batch_size").record(count as f64);
                    metrics::histogram!("sink_flush_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    tracing::debug!(count, reason = reason.as_str(), "flushed batch");
                    return FlushOutcome::Flushed(count);
                }
                Err(e) if attempt < self.config.max_flush_attempts => {
                    metrics::counter!("sink_flush_retries_total").increment(1);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_attempts = self.config.max_flush_attempts,
                        "store write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    *self.last_flush.lock() = Instant::now();
                    self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .events_dropped
                        .fetch_add(count as u64, Ordering::Relaxed);
                    metrics::counter!("sink_batches_failed_total").increment(1);
                    metrics::counter!("sink_events_dropped_total").increment(count as u64);
                    tracing::error!(
                        error = %e,
                        count,
                        attempts = attempt,
                        "dropping batch after exhausting write retries"
                    );
                    return FlushOutcome::Dropped(count);
                }
            }
        }
    }
}
