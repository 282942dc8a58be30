//! Weather provider client.
//!
//! A read-only fetch of current conditions for a fixed location. The
//! provider is best-effort: a failed fetch never blocks the pipeline, it
//! only yields an unenriched event.

use crate::Result;
use chrono::Utc;
use hearth_core::EnrichmentContext;
use serde::Deserialize;
use std::time::Duration;

/// A source of current weather conditions.
///
/// The trait seam lets tests count provider calls without a network.
pub trait WeatherProvider: Send + Sync + 'static {
    fn fetch_current(&self) -> impl Future<Output = Result<EnrichmentContext>> + Send;
}

/// Configuration for the HTTP weather provider.
#[derive(Debug, Clone)]
pub struct WeatherConfig {
    /// Current-conditions endpoint, e.g.
    /// `https://api.openweathermap.org/data/2.5/weather`.
    pub base_url: String,

    pub api_key: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org/data/2.5/weather".to_string(),
            api_key: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP weather client for an OpenWeatherMap-compatible endpoint.
pub struct HttpWeatherClient {
    client: reqwest::Client,
    config: WeatherConfig,
}

/// Wire shape of the provider's current-conditions response. Only the
/// fields the pipeline attaches are parsed.
#[derive(Debug, Deserialize)]
struct CurrentConditions {
    main: ConditionsMain,
    #[serde(default)]
    wind: Option<ConditionsWind>,
    #[serde(default)]
    weather: Vec<ConditionsLabel>,
}

#[derive(Debug, Deserialize)]
struct ConditionsMain {
    temp: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ConditionsWind {
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ConditionsLabel {
    main: Option<String>,
}

impl HttpWeatherClient {
    pub fn new(config: WeatherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

impl WeatherProvider for HttpWeatherClient {
    async fn fetch_current(&self) -> Result<EnrichmentContext> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("lat", self.config.latitude.to_string()),
                ("lon", self.config.longitude.to_string()),
                ("appid", self.config.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let conditions: CurrentConditions = response.json().await?;

        Ok(EnrichmentContext {
            temperature_c: conditions.main.temp,
            humidity_pct: conditions.main.humidity,
            pressure_hpa: conditions.main.pressure,
            wind_speed_ms: conditions.wind.and_then(|w| w.speed),
            condition: conditions.weather.into_iter().next().and_then(|w| w.main),
            fetched_at: Utc::now(),
        })
    }
}
