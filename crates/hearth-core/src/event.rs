//! Event records for each stage of the ingestion pipeline.
//!
//! Events move through the pipeline as a progression of record types, each
//! produced by one stage and consumed by the next:
//!
//! ```text
//! RawEvent ──extract──▶ FlatEvent ──enrich──▶ EnrichedEvent ──normalize──▶ NormalizedEvent
//! ```
//!
//! `RawEvent` mirrors the hub's wire envelope and exists only inside the
//! stream client and the extractor's input. Everything downstream works on
//! the flat records, which carry optional fields explicitly so each stage's
//! guarantees live in the type rather than in runtime key lookups. Records
//! are never mutated in place; each stage builds a new, extended record.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema version stamped on every normalized record.
///
/// Bump when the normalized field set changes shape so downstream consumers
/// can distinguish rows written by older deployments.
pub const SCHEMA_VERSION: u16 = 2;

// ═══════════════════════════════════════════════════════════════════════════
// Hub wire envelope
// ═══════════════════════════════════════════════════════════════════════════

/// A state-change event as pushed by the hub.
///
/// This is the hub's native nested shape: the entity identifier lives inside
/// the `data` payload, and may additionally be repeated inside each state
/// sub-object. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub event_type: String,

    pub data: RawEventData,

    /// When the hub fired the event. Monotonically increasing per connection.
    #[serde(default)]
    pub time_fired: Option<DateTime<Utc>>,

    /// Correlation context attached by the hub.
    #[serde(default)]
    pub context: Option<EventContext>,
}

/// The `data` payload of a hub state-change envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEventData {
    #[serde(default)]
    pub entity_id: Option<String>,

    #[serde(default)]
    pub old_state: Option<RawStateObject>,

    #[serde(default)]
    pub new_state: Option<RawStateObject>,
}

/// A state sub-object as the hub serializes it.
///
/// The nested `entity_id` is redundant with the one in [`RawEventData`] and
/// is stripped during extraction. The `state` value is usually a string but
/// the hub occasionally emits bare numbers; extraction coerces.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStateObject {
    #[serde(default)]
    pub entity_id: Option<String>,

    #[serde(default)]
    pub state: Option<Value>,

    #[serde(default)]
    pub attributes: Map<String, Value>,

    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Correlation/context identifier from the hub envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct EventContext {
    #[serde(default)]
    pub id: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Flat (canonical) event
// ═══════════════════════════════════════════════════════════════════════════

/// A state snapshot with the nested identifier stripped.
///
/// Fields stay optional here: the validation stage is responsible for
/// deciding which absences are errors, not the extractor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateSnapshot {
    /// The reported state value, coerced to a string. `None` when the hub
    /// sent an explicit null.
    pub state: Option<String>,

    pub attributes: Map<String, Value>,

    pub last_changed: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Summary of what changed between the old and new state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    /// Previous state value. `None` for a first-seen entity.
    pub from: Option<String>,

    /// New state value.
    pub to: Option<String>,

    pub changed: bool,
}

/// The canonical internal event produced by the extractor.
///
/// Invariant: `entity_id` appears exactly once, at top level. State
/// sub-objects never carry an identifier field.
#[derive(Debug, Clone, Serialize)]
pub struct FlatEvent {
    /// Domain-qualified identifier, e.g. `sensor.kitchen_temperature`.
    pub entity_id: String,

    pub event_type: String,

    /// Origin timestamp assigned by the hub.
    pub time_fired: DateTime<Utc>,

    pub old_state: Option<StateSnapshot>,
    pub new_state: StateSnapshot,

    pub state_change: StateChange,

    pub context_id: Option<String>,
}

impl FlatEvent {
    /// The domain portion of the entity id (`sensor` in `sensor.foo`), or
    /// the whole id if it carries no separator. Validation rejects the
    /// latter case before anything downstream relies on this.
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Enrichment
// ═══════════════════════════════════════════════════════════════════════════

/// A weather snapshot attached to events by the enrichment gateway.
///
/// Owned by the enrichment cache; shared read-only with the pipeline once
/// attached. Never attached past the cache's configured time-to-live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentContext {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,

    /// Short condition label, e.g. `Clouds` or `Rain`.
    pub condition: Option<String>,

    /// When this snapshot was fetched from the provider.
    pub fetched_at: DateTime<Utc>,
}

/// A [`FlatEvent`] with weather context attached (or explicitly absent).
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    pub event: FlatEvent,

    /// `None` when the provider was unreachable or enrichment is disabled;
    /// the event still proceeds through the pipeline.
    pub weather: Option<EnrichmentContext>,
}

impl EnrichedEvent {
    pub fn weather_enriched(&self) -> bool {
        self.weather.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Normalized event
// ═══════════════════════════════════════════════════════════════════════════

/// Coarse time-of-day bucket derived from the event's origin timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    /// Bucket for an hour in `0..24`: night [0,6), morning [6,12),
    /// afternoon [12,18), evening [18,24).
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => Self::Night,
            6..=11 => Self::Morning,
            12..=17 => Self::Afternoon,
            _ => Self::Evening,
        }
    }

    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self::from_hour(ts.hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Night => "night",
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }
}

/// The immutable unit of work handed to the batched store writer.
///
/// Produced only for events that passed validation.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedEvent {
    pub entity_id: String,
    pub domain: String,
    pub event_type: String,
    pub time_fired: DateTime<Utc>,

    /// The raw state string, preserved even when numeric coercion succeeds.
    pub state: Option<String>,

    /// Numeric coercion of `state`, `None` for non-numeric states.
    pub value: Option<f64>,

    /// Standardized unit label, `None` when the entity reports no unit.
    pub unit: Option<String>,

    /// Gap between the previous state's `last_updated` and this event's
    /// origin timestamp. `None` for first-seen entities.
    pub duration_in_previous_state_seconds: Option<f64>,

    pub time_of_day: TimeOfDay,

    pub weather: Option<EnrichmentContext>,
    pub weather_enriched: bool,

    /// Normalization marker for schema evolution tracking.
    pub normalized_at: DateTime<Utc>,
    pub schema_version: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_splits_entity_id() {
        let event = FlatEvent {
            entity_id: "sensor.kitchen_temperature".to_string(),
            event_type: "state_changed".to_string(),
            time_fired: Utc::now(),
            old_state: None,
            new_state: StateSnapshot::default(),
            state_change: StateChange {
                from: None,
                to: None,
                changed: true,
            },
            context_id: None,
        };
        assert_eq!(event.domain(), "sensor");
    }

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(TimeOfDay::from_hour(0), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(6), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(11), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(17), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(18), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(23), TimeOfDay::Evening);
    }

    #[test]
    fn test_raw_event_deserializes_hub_envelope() {
        let json = r#"{
            "event_type": "state_changed",
            "data": {
                "entity_id": "light.hallway",
                "old_state": {
                    "entity_id": "light.hallway",
                    "state": "off",
                    "attributes": {"friendly_name": "Hallway"},
                    "last_changed": "2025-06-01T10:00:00+00:00",
                    "last_updated": "2025-06-01T10:00:00+00:00"
                },
                "new_state": {
                    "entity_id": "light.hallway",
                    "state": "on",
                    "attributes": {"friendly_name": "Hallway", "brightness": 254},
                    "last_changed": "2025-06-01T10:05:00+00:00",
                    "last_updated": "2025-06-01T10:05:00+00:00"
                }
            },
            "time_fired": "2025-06-01T10:05:00+00:00",
            "context": {"id": "01HV3X"}
        }"#;

        let raw: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(raw.event_type, "state_changed");
        assert_eq!(raw.data.entity_id.as_deref(), Some("light.hallway"));
        assert!(raw.data.old_state.is_some());
        let new_state = raw.data.new_state.unwrap();
        assert_eq!(new_state.state, Some(Value::String("on".to_string())));
        assert_eq!(raw.context.unwrap().id.as_deref(), Some("01HV3X"));
    }

    #[test]
    fn test_raw_event_tolerates_missing_states() {
        let json = r#"{"event_type": "state_changed", "data": {"entity_id": "sensor.x"}}"#;
        let raw: RawEvent = serde_json::from_str(json).unwrap();
        assert!(raw.data.old_state.is_none());
        assert!(raw.data.new_state.is_none());
        assert!(raw.time_fired.is_none());
    }
}
