//! Event extractor: hub envelope → canonical flat event.
//!
//! A pure transformation. The entity identifier is pulled from the nested
//! data payload to the top level, duplicate identifiers are stripped from
//! the state sub-objects, and the old/new values are compared into a
//! `state_change` summary. Semantic validation happens later; the extractor
//! only refuses envelopes that carry no information at all (no `new_state`).

use chrono::{DateTime, Utc};
use hearth_core::event::{
    FlatEvent, RawEvent, RawStateObject, StateChange, StateSnapshot,
};
use hearth_core::{Error, Result};
use serde_json::Value;

/// Flatten a hub envelope into a [`FlatEvent`].
///
/// Fails fast when `new_state` is entirely absent, since such an event has
/// nothing to persist. The same malformed envelope will not become
/// well-formed, so callers drop it rather than retry.
pub fn flatten(raw: RawEvent) -> Result<FlatEvent> {
    let data = raw.data;

    let Some(new_raw) = data.new_state else {
        metrics::counter!("extract_dropped_total", "reason" => "missing_new_state").increment(1);
        return Err(Error::MissingNewState {
            entity: data.entity_id,
        });
    };

    let Some(entity_id) = data.entity_id else {
        metrics::counter!("extract_dropped_total", "reason" => "missing_entity_id").increment(1);
        return Err(Error::MissingEntityId);
    };

    let old_state = data.old_state.map(strip_identifier);
    let new_state = strip_identifier(new_raw);

    // Absent old state means a first-seen entity: always a change.
    let state_change = match &old_state {
        Some(old) => StateChange {
            changed: old.state != new_state.state,
            from: old.state.clone(),
            to: new_state.state.clone(),
        },
        None => StateChange {
            from: None,
            to: new_state.state.clone(),
            changed: true,
        },
    };

    let time_fired = resolve_time_fired(raw.time_fired, &new_state);

    metrics::counter!("extract_events_total").increment(1);

    Ok(FlatEvent {
        entity_id,
        event_type: raw.event_type,
        time_fired,
        old_state,
        new_state,
        state_change,
        context_id: raw.context.and_then(|c| c.id),
    })
}

/// Drop the nested identifier and coerce the state value to a string.
fn strip_identifier(raw: RawStateObject) -> StateSnapshot {
    StateSnapshot {
        state: raw.state.and_then(coerce_state_value),
        attributes: raw.attributes,
        last_changed: raw.last_changed,
        last_updated: raw.last_updated,
    }
}

/// The hub usually sends state values as strings but occasionally emits
/// bare numbers or booleans. Null stays absent.
fn coerce_state_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Prefer the envelope's own origin timestamp; fall back to the new state's
/// `last_updated` so a missing `time_fired` alone does not lose the event.
fn resolve_time_fired(
    time_fired: Option<DateTime<Utc>>,
    new_state: &StateSnapshot,
) -> DateTime<Utc> {
    time_fired
        .or(new_state.last_updated)
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hearth_core::event::{EventContext, RawEventData};
    use serde_json::{Map, json};

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, minute, 0).unwrap()
    }

    fn raw_state(state: &str, minute: u32) -> RawStateObject {
        RawStateObject {
            entity_id: Some("sensor.kitchen_temperature".to_string()),
            state: Some(json!(state)),
            attributes: Map::new(),
            last_changed: Some(ts(minute)),
            last_updated: Some(ts(minute)),
        }
    }

    fn raw_event(old: Option<RawStateObject>, new: Option<RawStateObject>) -> RawEvent {
        RawEvent {
            event_type: "state_changed".to_string(),
            data: RawEventData {
                entity_id: Some("sensor.kitchen_temperature".to_string()),
                old_state: old,
                new_state: new,
            },
            time_fired: Some(ts(5)),
            context: Some(EventContext {
                id: Some("ctx-1".to_string()),
            }),
        }
    }

    #[test]
    fn test_entity_id_appears_only_at_top_level() {
        let flat = flatten(raw_event(Some(raw_state("20.1", 0)), Some(raw_state("22.5", 5))))
            .unwrap();

        assert_eq!(flat.entity_id, "sensor.kitchen_temperature");
        // StateSnapshot has no identifier field by construction; confirm the
        // serialized form carries it exactly once, at top level.
        let json = serde_json::to_value(&flat).unwrap();
        assert!(json["new_state"].get("entity_id").is_none());
        assert!(json["old_state"].get("entity_id").is_none());
        assert_eq!(json["entity_id"], "sensor.kitchen_temperature");
    }

    #[test]
    fn test_state_change_compares_values() {
        let flat = flatten(raw_event(Some(raw_state("off", 0)), Some(raw_state("on", 5))))
            .unwrap();
        assert!(flat.state_change.changed);
        assert_eq!(flat.state_change.from.as_deref(), Some("off"));
        assert_eq!(flat.state_change.to.as_deref(), Some("on"));

        let same = flatten(raw_event(Some(raw_state("on", 0)), Some(raw_state("on", 5))))
            .unwrap();
        assert!(!same.state_change.changed);
    }

    #[test]
    fn test_absent_old_state_is_a_change_from_null() {
        let flat = flatten(raw_event(None, Some(raw_state("21.0", 5)))).unwrap();
        assert!(flat.state_change.changed);
        assert!(flat.state_change.from.is_none());
        assert_eq!(flat.state_change.to.as_deref(), Some("21.0"));
        assert!(flat.old_state.is_none());
    }

    #[test]
    fn test_missing_new_state_is_an_error() {
        let err = flatten(raw_event(Some(raw_state("on", 0)), None)).unwrap_err();
        assert!(matches!(err, Error::MissingNewState { .. }));
    }

    #[test]
    fn test_missing_entity_id_is_an_error() {
        let mut raw = raw_event(None, Some(raw_state("on", 5)));
        raw.data.entity_id = None;
        let err = flatten(raw).unwrap_err();
        assert!(matches!(err, Error::MissingEntityId));
    }

    #[test]
    fn test_numeric_state_value_coerced_to_string() {
        let mut new = raw_state("ignored", 5);
        new.state = Some(json!(22.5));
        let flat = flatten(raw_event(None, Some(new))).unwrap();
        assert_eq!(flat.new_state.state.as_deref(), Some("22.5"));
    }

    #[test]
    fn test_null_state_value_stays_absent() {
        let mut new = raw_state("ignored", 5);
        new.state = Some(Value::Null);
        let flat = flatten(raw_event(None, Some(new))).unwrap();
        assert!(flat.new_state.state.is_none());
    }

    #[test]
    fn test_missing_time_fired_falls_back_to_last_updated() {
        let mut raw = raw_event(None, Some(raw_state("on", 5)));
        raw.time_fired = None;
        let flat = flatten(raw).unwrap();
        assert_eq!(flat.time_fired, ts(5));
    }
}
