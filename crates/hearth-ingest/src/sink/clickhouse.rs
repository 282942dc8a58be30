//! ClickHouse store for normalized state rows.
//!
//! Each row is tagged by entity id and domain and carries the normalized
//! fields plus a nanosecond-resolution event timestamp (`DateTime64(9)` in
//! the table schema, transported as raw nanoseconds).

use crate::Result;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use hearth_core::NormalizedEvent;
use serde::{Deserialize, Serialize};

/// A sink accepting batched point writes.
///
/// The trait seam lets the pipeline and its tests run against an in-memory
/// store while production wires in [`ClickHouseStore`].
pub trait StateStore: Send + Sync + 'static {
    fn write_points(&self, rows: &[StateRow]) -> impl Future<Output = Result<()>> + Send;
}

/// Configuration for the ClickHouse store.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// ClickHouse server URL (e.g., "http://localhost:8123")
    pub url: String,

    /// Database name
    pub database: String,

    /// Table name for normalized state rows
    pub table: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "hearth".to_string(),
            table: "states".to_string(),
        }
    }
}

/// Row structure matching the ClickHouse states table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct StateRow {
    /// Event origin time as Unix nanoseconds (DateTime64(9)).
    pub time_ns: i64,
    pub entity_id: String,
    pub domain: String,
    pub event_type: String,
    pub state: String,
    pub value: Option<f64>,
    pub unit: String,
    pub duration_in_previous_state_seconds: Option<f64>,
    pub time_of_day: String,
    pub weather_enriched: bool,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub condition: String,
    pub schema_version: u16,
    /// Normalization time as Unix nanoseconds (DateTime64(9)).
    pub normalized_at_ns: i64,
}

impl From<&NormalizedEvent> for StateRow {
    fn from(event: &NormalizedEvent) -> Self {
        let weather = event.weather.as_ref();
        Self {
            time_ns: unix_nanos(event.time_fired),
            entity_id: event.entity_id.clone(),
            domain: event.domain.clone(),
            event_type: event.event_type.clone(),
            state: event.state.clone().unwrap_or_default(),
            value: event.value,
            unit: event.unit.clone().unwrap_or_default(),
            duration_in_previous_state_seconds: event.duration_in_previous_state_seconds,
            time_of_day: event.time_of_day.as_str().to_string(),
            weather_enriched: event.weather_enriched,
            temperature_c: weather.and_then(|w| w.temperature_c),
            humidity_pct: weather.and_then(|w| w.humidity_pct),
            pressure_hpa: weather.and_then(|w| w.pressure_hpa),
            wind_speed_ms: weather.and_then(|w| w.wind_speed_ms),
            condition: weather
                .and_then(|w| w.condition.clone())
                .unwrap_or_default(),
            schema_version: event.schema_version,
            normalized_at_ns: unix_nanos(event.normalized_at),
        }
    }
}

/// Nanosecond-resolution Unix timestamp, saturating at the chrono range
/// boundary (year 2262) rather than panicking.
fn unix_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or_else(|| ts.timestamp_micros().saturating_mul(1_000))
}

/// ClickHouse-backed state store.
pub struct ClickHouseStore {
    client: Client,
    config: ClickHouseConfig,
}

impl ClickHouseStore {
    pub fn new(config: ClickHouseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        tracing::info!(
            url = %config.url,
            database = %config.database,
            table = %config.table,
            "ClickHouse store initialized"
        );

        Self { client, config }
    }

    /// Check that ClickHouse is reachable.
    pub async fn health_check(&self) -> Result<bool> {
        let result: u8 = self.client.query("SELECT 1").fetch_one().await?;
        Ok(result == 1)
    }
}

impl StateStore for ClickHouseStore {
    async fn write_points(&self, rows: &[StateRow]) -> Result<()> {
        let mut insert = self.client.insert(&self.config.table)?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }
}
