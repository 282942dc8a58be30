//! Health and metrics surface.
//!
//! A small read-only HTTP endpoint for external monitoring: `/health`
//! reports connection status, circuit breaker state, cache hit rate, and
//! pipeline/writer counters as JSON; `/metrics` serves the rendered
//! Prometheus registry. None of this participates in the core logic.

use crate::enrich::{CacheStats, CacheStatsSnapshot, CircuitBreaker};
use crate::hub::{ConnectionState, HubClient, HubStatsSnapshot};
use crate::pipeline::{PipelineStats, PipelineStatsSnapshot};
use crate::sink::{WriterStats, WriterStatsSnapshot};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only view over the pipeline's shared counters.
pub struct HealthState {
    hub: Arc<HubClient>,
    breaker: Arc<CircuitBreaker>,
    cache: Option<Arc<CacheStats>>,
    pipeline: Arc<PipelineStats>,
    writer: Arc<WriterStats>,
    healthy: AtomicBool,
}

impl HealthState {
    pub fn new(
        hub: Arc<HubClient>,
        breaker: Arc<CircuitBreaker>,
        cache: Option<Arc<CacheStats>>,
        pipeline: Arc<PipelineStats>,
        writer: Arc<WriterStats>,
    ) -> Self {
        Self {
            hub,
            breaker,
            cache,
            pipeline,
            writer,
            healthy: AtomicBool::new(true),
        }
    }

    /// Mark the service unhealthy. Set on fatal conditions (repeated
    /// authentication rejection); never cleared without a restart.
    pub fn set_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn report(&self) -> HealthResponse {
        let connection_state = self.hub.state();
        let status = if !self.is_healthy() {
            "unhealthy"
        } else if connection_state != ConnectionState::Subscribed {
            "degraded"
        } else {
            "ok"
        };

        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            connection: ConnectionReport {
                state: connection_state.as_str(),
                stats: self.hub.stats().snapshot(),
            },
            breaker: self.breaker.state().as_str(),
            cache: self.cache.as_ref().map(|c| c.snapshot()),
            pipeline: self.pipeline.snapshot(),
            writer: self.writer.snapshot(),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connection: ConnectionReport,
    breaker: &'static str,
    /// Absent when weather enrichment is disabled.
    cache: Option<CacheStatsSnapshot>,
    pipeline: PipelineStatsSnapshot,
    writer: WriterStatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
struct ConnectionReport {
    state: &'static str,
    #[serde(flatten)]
    stats: HubStatsSnapshot,
}

async fn health_check(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let report = state.report();
    let code = if report.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report))
}

/// Build the status router: `/health` plus the Prometheus `/metrics`.
pub fn router(state: Arc<HealthState>, metrics: PrometheusHandle) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move { metrics.render() }
            }),
        )
}

/// Serve the status router in a background task.
pub async fn serve(port: u16, router: Router) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("status server listening on http://{addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "status server exited");
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::BreakerConfig;
    use crate::hub::HubConfig;

    fn health_state() -> HealthState {
        HealthState::new(
            Arc::new(HubClient::new(HubConfig::default())),
            Arc::new(CircuitBreaker::new(BreakerConfig::default())),
            None,
            Arc::new(PipelineStats::default()),
            Arc::new(WriterStats::default()),
        )
    }

    #[test]
    fn test_report_degraded_until_subscribed() {
        let state = health_state();
        let report = state.report();
        assert_eq!(report.status, "degraded");
        assert_eq!(report.connection.state, "disconnected");
        assert_eq!(report.breaker, "closed");
        assert!(report.cache.is_none());
    }

    #[test]
    fn test_unhealthy_is_sticky() {
        let state = health_state();
        assert!(state.is_healthy());
        state.set_unhealthy();
        assert!(!state.is_healthy());
        assert_eq!(state.report().status, "unhealthy");
    }

    #[test]
    fn test_report_serializes() {
        let state = health_state();
        let json = serde_json::to_value(state.report()).unwrap();
        assert_eq!(json["breaker"], "closed");
        assert_eq!(json["connection"]["state"], "disconnected");
        assert_eq!(json["writer"]["events_written"], 0);
    }
}
