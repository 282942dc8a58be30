//! Normalization of validated events.
//!
//! Applied only to records that passed validation: numeric coercion of the
//! state value, unit label standardization, the duration spent in the
//! previous state, the time-of-day bucket, and the normalization marker for
//! schema evolution tracking.

use chrono::Utc;
use hearth_core::event::{EnrichedEvent, NormalizedEvent, SCHEMA_VERSION, TimeOfDay};

/// Attribute key under which entities report their unit.
const UNIT_ATTRIBUTE: &str = "unit_of_measurement";

/// Produce the immutable normalized record for a validated event.
pub fn normalize(enriched: EnrichedEvent) -> NormalizedEvent {
    let EnrichedEvent { event, weather } = enriched;

    let state = event.new_state.state.clone();
    let value = state.as_deref().and_then(coerce_numeric);

    let unit = event
        .new_state
        .attributes
        .get(UNIT_ATTRIBUTE)
        .and_then(|v| v.as_str())
        .map(standardize_unit);

    // Gap between the previous state's last_updated and this event's origin
    // timestamp. First-seen entities have no previous state to measure.
    let duration_in_previous_state_seconds = event
        .old_state
        .as_ref()
        .and_then(|old| old.last_updated)
        .map(|prev| (event.time_fired - prev).num_milliseconds() as f64 / 1000.0);

    let weather_enriched = weather.is_some();

    NormalizedEvent {
        domain: event.domain().to_string(),
        entity_id: event.entity_id,
        event_type: event.event_type,
        time_fired: event.time_fired,
        state,
        value,
        unit,
        duration_in_previous_state_seconds,
        time_of_day: TimeOfDay::from_timestamp(event.time_fired),
        weather,
        weather_enriched,
        normalized_at: Utc::now(),
        schema_version: SCHEMA_VERSION,
    }
}

/// Coerce a state string to a number when it parses as one. Non-numeric
/// states stay `None`; the raw string is preserved on the record either way.
fn coerce_numeric(state: &str) -> Option<f64> {
    state.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Map reported unit labels onto their standard forms. Unmapped labels pass
/// through verbatim rather than erroring, so unknown sensors keep reporting.
fn standardize_unit(raw: &str) -> String {
    match raw.trim() {
        "°C" | "C" | "celsius" | "Celsius" => "°C",
        "°F" | "F" | "fahrenheit" | "Fahrenheit" => "°F",
        "%" | "percent" => "%",
        "hPa" | "mbar" | "millibar" => "hPa",
        "W" | "watt" | "Watt" => "W",
        "kW" => "kW",
        "Wh" => "Wh",
        "kWh" => "kWh",
        "lx" | "lux" => "lx",
        "m/s" => "m/s",
        "km/h" | "kph" => "km/h",
        "ppm" => "ppm",
        "µg/m³" | "ug/m3" => "µg/m³",
        other => other,
    }
    .to_string()
}
