//! hearth live ingestion daemon.
//!
//! Connects to the home-automation hub, streams state-change events, and
//! runs them through the enrichment/validation/normalization pipeline into
//! ClickHouse.
//!
//! # Usage
//!
//! ```bash
//! # Minimal: hub credentials plus the local ClickHouse defaults
//! hearth-ingest --hub-url ws://hub.local:8123/api/websocket --hub-token "$TOKEN"
//!
//! # With weather enrichment
//! hearth-ingest \
//!     --hub-url ws://hub.local:8123/api/websocket --hub-token "$TOKEN" \
//!     --weather-api-key "$OWM_KEY" --latitude 52.52 --longitude 13.40
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) triggers a drain: the hub client closes its subscription
//! cleanly, buffered events run through the remaining stages, and the final
//! batch is flushed within a bounded grace period.

use anyhow::{Context, Result};
use clap::Parser;
use hearth_core::metrics::init_metrics;
use hearth_ingest::enrich::{
    BreakerConfig, CircuitBreaker, EnrichmentGateway, ForwardConfig, HttpWeatherClient,
    ProcessorHandle, WeatherCache, WeatherCacheConfig, WeatherConfig,
};
use hearth_ingest::health::{self, HealthState};
use hearth_ingest::hub::{HubClient, HubConfig};
use hearth_ingest::pipeline::{self, PipelineStats};
use hearth_ingest::sink::{BatchConfig, BatchWriter, ClickHouseConfig, ClickHouseStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

/// hearth live ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "hearth-ingest")]
#[command(about = "Home-automation event ingestion daemon")]
#[command(version)]
struct Args {
    /// Hub websocket endpoint
    #[arg(long, default_value = "ws://localhost:8123/api/websocket")]
    hub_url: String,

    /// Hub access token
    #[arg(long)]
    hub_token: String,

    /// ClickHouse URL (e.g., http://localhost:8123)
    #[arg(long, default_value = "http://localhost:8123")]
    clickhouse_url: String,

    /// ClickHouse database name
    #[arg(long, default_value = "hearth")]
    clickhouse_db: String,

    /// ClickHouse table for normalized state rows
    #[arg(long, default_value = "states")]
    clickhouse_table: String,

    /// Weather provider endpoint
    #[arg(
        long,
        default_value = "https://api.openweathermap.org/data/2.5/weather"
    )]
    weather_url: String,

    /// Weather provider API key (enrichment disabled when absent)
    #[arg(long)]
    weather_api_key: Option<String>,

    /// Deployment latitude for weather lookups
    #[arg(long, default_value = "0.0")]
    latitude: f64,

    /// Deployment longitude for weather lookups
    #[arg(long, default_value = "0.0")]
    longitude: f64,

    /// Weather cache time-to-live in seconds
    #[arg(long, default_value = "300")]
    cache_ttl_secs: u64,

    /// Events per write batch before an immediate flush
    #[arg(long, default_value = "100")]
    batch_size: usize,

    /// Flush timer in seconds
    #[arg(long, default_value = "5")]
    flush_interval_secs: u64,

    /// Grace period for the shutdown drain, in seconds
    #[arg(long, default_value = "10")]
    shutdown_grace_secs: u64,

    /// Status HTTP server port for /health and /metrics (0 to disable)
    #[arg(long, default_value = "9090")]
    status_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs are present)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("hearth_ingest=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("hearth ingestion daemon starting...");
    tracing::info!("Configuration:");
    tracing::info!("  Hub: {}", args.hub_url);
    tracing::info!("  ClickHouse: {} ({})", args.clickhouse_url, args.clickhouse_db);
    tracing::info!(
        "  Weather enrichment: {}",
        if args.weather_api_key.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );
    tracing::info!("  Batch: {} events / {}s", args.batch_size, args.flush_interval_secs);

    let metrics_handle = init_metrics();

    // ── Pipeline components ────────────────────────────────────────────────

    let hub = Arc::new(HubClient::new(HubConfig {
        url: args.hub_url.clone(),
        access_token: args.hub_token.clone(),
        ..Default::default()
    }));

    let store = ClickHouseStore::new(ClickHouseConfig {
        url: args.clickhouse_url.clone(),
        database: args.clickhouse_db.clone(),
        table: args.clickhouse_table.clone(),
    });
    if let Ok(reachable) = store.health_check().await {
        tracing::info!("ClickHouse reachable: {reachable}");
    } else {
        // Not fatal: the writer retries per batch and drops loudly.
        tracing::warn!("ClickHouse not reachable at startup");
    }

    let writer = Arc::new(BatchWriter::new(
        store,
        BatchConfig {
            max_batch_size: args.batch_size,
            flush_interval: Duration::from_secs(args.flush_interval_secs),
            ..Default::default()
        },
    ));

    let cache = match &args.weather_api_key {
        Some(api_key) => {
            let provider = HttpWeatherClient::new(WeatherConfig {
                base_url: args.weather_url.clone(),
                api_key: api_key.clone(),
                latitude: args.latitude,
                longitude: args.longitude,
                ..Default::default()
            })
            .context("Failed to build weather client")?;
            Some(Arc::new(WeatherCache::new(
                WeatherCacheConfig {
                    ttl: Duration::from_secs(args.cache_ttl_secs),
                    ..Default::default()
                },
                provider,
            )))
        }
        None => None,
    };

    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    let pipeline_stats = Arc::new(PipelineStats::default());

    let (raw_tx, raw_rx) = mpsc::channel(1024);
    let (flat_tx, flat_rx) = mpsc::channel(1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let forward_config = ForwardConfig::default();
    let gateway = EnrichmentGateway::new(
        ProcessorHandle::new(flat_tx, forward_config.submit_timeout),
        Arc::clone(&breaker),
        forward_config,
    );

    // ── Status surface ─────────────────────────────────────────────────────

    let health_state = Arc::new(HealthState::new(
        Arc::clone(&hub),
        Arc::clone(&breaker),
        cache.as_ref().map(|c| c.stats()),
        Arc::clone(&pipeline_stats),
        writer.stats(),
    ));
    if args.status_port > 0 {
        let router = health::router(Arc::clone(&health_state), metrics_handle);
        health::serve(args.status_port, router)
            .await
            .context("Failed to start status server")?;
    }

    // ── Stage tasks ────────────────────────────────────────────────────────

    let extract_task = tokio::spawn(pipeline::run_extract_stage(
        raw_rx,
        gateway,
        Arc::clone(&pipeline_stats),
    ));
    let process_task = tokio::spawn(pipeline::run_process_stage(
        flat_rx,
        cache.clone(),
        Arc::clone(&writer),
        Arc::clone(&pipeline_stats),
    ));
    let flush_task = tokio::spawn(pipeline::run_flush_timer(
        Arc::clone(&writer),
        shutdown_rx,
    ));

    let mut hub_task = tokio::spawn({
        let hub = Arc::clone(&hub);
        async move { hub.run(raw_tx).await }
    });

    tracing::info!("Starting live ingestion...");

    // ── Run until signal or fatal hub error ────────────────────────────────

    let hub_result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping gracefully...");
            hub.stop();
            hub_task.await.context("hub task panicked")?
        }
        result = &mut hub_task => result.context("hub task panicked")?,
    };

    // ── Drain ──────────────────────────────────────────────────────────────

    // The hub task has returned and dropped its sender; each stage drains
    // its queue and closes the next. The process stage performs the final
    // flush on its way out.
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(args.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        let _ = extract_task.await;
        let _ = process_task.await;
        let _ = flush_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(grace_secs = args.shutdown_grace_secs, "drain exceeded grace period");
    }

    // ── Summary ────────────────────────────────────────────────────────────

    let hub_stats = hub.stats().snapshot();
    let stages = pipeline_stats.snapshot();
    let sink = writer.stats().snapshot();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Events received:      {}", hub_stats.events_received);
    tracing::info!("Events extracted:     {}", stages.extracted);
    tracing::info!("Events validated:     {}", stages.validated);
    tracing::info!("Events rejected:      {}", stages.rejected);
    tracing::info!("Rows written:         {}", sink.events_written);
    tracing::info!("Batches flushed:      {}", sink.batches_flushed);
    tracing::info!("Batches dropped:      {}", sink.batches_failed);
    tracing::info!("Reconnects:           {}", hub_stats.reconnects);

    if let Err(e) = hub_result {
        health_state.set_unhealthy();
        tracing::error!(error = %e, "hub client exited fatally");
        return Err(e).context("hub client failed");
    }

    Ok(())
}
