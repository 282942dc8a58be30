//! Enrichment gateway.
//!
//! Two halves, split across the hand-off between the extractor and the
//! processing stage:
//!
//! - the **forwarding side** hands flattened events to the processing stage
//!   through a bounded retry guarded by a process-wide [`CircuitBreaker`],
//!   so a degraded downstream degrades into fast failures instead of backing
//!   up the stream client;
//! - the **receiving side** attaches weather context through the TTL-bounded
//!   [`WeatherCache`] before validation.

mod breaker;
mod cache;
mod weather;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use cache::{CacheStats, CacheStatsSnapshot, WeatherCache, WeatherCacheConfig};
pub use weather::{HttpWeatherClient, WeatherConfig, WeatherProvider};

use crate::{Error, Result};
use hearth_core::FlatEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Configuration for the forwarding hand-off.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Total submit attempts before the breaker records a failure.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per attempt.
    pub retry_base: Duration,

    /// How long one submit may wait for queue space.
    pub submit_timeout: Duration,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_base: Duration::from_millis(100),
            submit_timeout: Duration::from_secs(1),
        }
    }
}

/// Sending handle for the processing stage's input queue.
///
/// The synchronous request/response seam the circuit breaker protects: a
/// submit either lands the event in the stage's queue or reports failure.
#[derive(Clone)]
pub struct ProcessorHandle {
    tx: mpsc::Sender<FlatEvent>,
    submit_timeout: Duration,
}

impl ProcessorHandle {
    pub fn new(tx: mpsc::Sender<FlatEvent>, submit_timeout: Duration) -> Self {
        Self { tx, submit_timeout }
    }

    pub async fn submit(&self, event: FlatEvent) -> Result<()> {
        self.tx
            .send_timeout(event, self.submit_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => Error::SubmitTimeout,
                mpsc::error::SendTimeoutError::Closed(_) => Error::ChannelClosed,
            })
    }
}

/// The forwarding side of the gateway.
pub struct EnrichmentGateway {
    processor: ProcessorHandle,
    breaker: Arc<CircuitBreaker>,
    config: ForwardConfig,
}

impl EnrichmentGateway {
    pub fn new(
        processor: ProcessorHandle,
        breaker: Arc<CircuitBreaker>,
        config: ForwardConfig,
    ) -> Self {
        Self {
            processor,
            breaker,
            config,
        }
    }

    /// Hand an event to the processing stage.
    ///
    /// Fails immediately with [`Error::CircuitOpen`] while the breaker is
    /// open; no retry budget is consumed. Otherwise retries up to the
    /// configured attempts with short exponential backoff; only the
    /// exhausted final failure is recorded against the breaker.
    pub async fn forward(&self, event: FlatEvent) -> Result<()> {
        if let Err(e) = self.breaker.try_acquire() {
            metrics::counter!("enrich_forward_rejected_total").increment(1);
            return Err(e);
        }

        let mut delay = self.config.retry_base;
        let mut attempt = 1u32;
        loop {
            match self.processor.submit(event.clone()).await {
                Ok(()) => {
                    self.breaker.record_success();
                    return Ok(());
                }
                Err(e) if attempt < self.config.max_attempts => {
                    metrics::counter!("enrich_forward_retries_total").increment(1);
                    tracing::debug!(error = %e, attempt, "hand-off failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    self.breaker.record_failure();
                    metrics::counter!("enrich_forward_failures_total").increment(1);
                    return Err(e);
                }
            }
        }
    }
}
