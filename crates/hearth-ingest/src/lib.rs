//! hearth ingestion pipeline components.
//!
//! This crate provides the pipeline that ingests state-change events from a
//! home-automation hub, enriches them with weather context, validates and
//! normalizes them, and batch-writes them to ClickHouse.
//!
//! # Modules
//!
//! - [`hub`] - Stream client: websocket connection, auth, subscribe, reconnect
//! - [`extract`] - Envelope flattening
//! - [`enrich`] - Weather cache, circuit breaker, stage hand-off
//! - [`validate`] / [`normalize`] - Structural checks and standardization
//! - [`sink`] - Batched writes to the time-series store
//! - [`pipeline`] - Stage tasks and the queues between them
//! - [`health`] - Read-only status and metrics surface
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐
//! │ HubClient │  websocket: auth → subscribe → stream, reconnect w/ backoff
//! └─────┬─────┘
//!       ▼
//! ┌───────────┐
//! │ Extractor │  RawEvent → FlatEvent (identifier hoisted, change summary)
//! └─────┬─────┘
//!       ▼
//! ┌───────────┐
//! │  Gateway  │  circuit-breaker-guarded hand-off; TTL weather cache
//! └─────┬─────┘
//!       ▼
//! ┌───────────┐
//! │ Validate/ │  reject-and-count policy; numeric/unit/duration fields
//! │ Normalize │
//! └─────┬─────┘
//!       ▼
//! ┌───────────┐
//! │BatchWriter│  flush on count or timer, bounded retry, drop loudly
//! └───────────┘
//! ```

pub mod enrich;
mod error;
pub mod extract;
pub mod health;
pub mod hub;
pub mod normalize;
pub mod pipeline;
pub mod sink;
pub mod validate;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use enrich::{
    BreakerConfig, CircuitBreaker, CircuitState, EnrichmentGateway, ForwardConfig,
    HttpWeatherClient, ProcessorHandle, WeatherCache, WeatherCacheConfig, WeatherConfig,
    WeatherProvider,
};
pub use hub::{ConnectionState, HubClient, HubConfig};
pub use sink::{BatchConfig, BatchWriter, ClickHouseConfig, ClickHouseStore, StateRow, StateStore};
pub use validate::{ValidationResult, validate};
