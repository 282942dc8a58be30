//! Structural validation of flat events.
//!
//! Gatekeeping only: a record with any error is rejected (logged, counted,
//! not persisted) without stopping the pipeline. Warnings ride along on
//! accepted records. Normalization runs only on records that pass.

use chrono::{DateTime, TimeDelta, Utc};
use hearth_core::FlatEvent;

/// Timestamps before this instant are treated as absurd rather than old:
/// 2000-01-01 00:00:00 UTC, well before any hub in the field existed.
pub const TIMESTAMP_FLOOR_UNIX: i64 = 946_684_800;

/// Tolerated clock skew into the future.
pub const MAX_FUTURE_SKEW_SECS: i64 = 300;

/// Domains the normalizer knows. An entity from any other domain is still
/// accepted (with a warning) since hubs grow domains faster than this
/// list does.
pub const KNOWN_DOMAINS: &[&str] = &[
    "automation",
    "binary_sensor",
    "button",
    "camera",
    "climate",
    "cover",
    "device_tracker",
    "fan",
    "input_boolean",
    "light",
    "lock",
    "media_player",
    "number",
    "person",
    "scene",
    "script",
    "select",
    "sensor",
    "sun",
    "switch",
    "vacuum",
    "weather",
    "zone",
];

/// Outcome of validating one event. Transient: produced once per event and
/// discarded after use.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,

    /// Structural errors, in check order. Any entry rejects the record.
    pub errors: Vec<String>,

    /// Advisory findings, in check order. Do not reject.
    pub warnings: Vec<String>,

    /// Domain portion of the entity id, when it resolved.
    pub domain: Option<String>,

    pub event_type: Option<String>,
}

/// Run all structural checks against a flat event.
pub fn validate(event: &FlatEvent) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut domain = None;

    // (a) entity_id present and shaped domain.object_id
    if event.entity_id.is_empty() {
        errors.push("entity_id is empty".to_string());
    } else if let Some(d) = parse_entity_id(&event.entity_id) {
        if !KNOWN_DOMAINS.contains(&d) {
            warnings.push(format!("unknown domain '{d}'"));
        }
        domain = Some(d.to_string());
    } else {
        errors.push(format!(
            "entity_id '{}' does not match domain.object_id",
            event.entity_id
        ));
    }

    // (b) event_type present
    if event.event_type.is_empty() {
        errors.push("event_type is empty".to_string());
    }

    // (c) state sub-objects must not carry a duplicated identifier. The
    // extractor strips the nested field itself; what can still sneak
    // through is an `entity_id` key inside the attribute map.
    for (label, snapshot) in [
        ("new_state", Some(&event.new_state)),
        ("old_state", event.old_state.as_ref()),
    ] {
        if let Some(snapshot) = snapshot
            && snapshot.attributes.contains_key("entity_id")
        {
            errors.push(format!("{label} attributes carry a duplicated entity_id"));
        }
    }

    // (d) new_state has a non-null state and both timestamps
    if event.new_state.state.is_none() {
        errors.push("new_state.state is null".to_string());
    }
    if event.new_state.last_changed.is_none() {
        errors.push("new_state.last_changed is missing".to_string());
    }
    if event.new_state.last_updated.is_none() {
        errors.push("new_state.last_updated is missing".to_string());
    }

    // (e) timestamps within a sane window
    let now = Utc::now();
    for (label, ts) in [
        ("time_fired", Some(event.time_fired)),
        ("new_state.last_changed", event.new_state.last_changed),
        ("new_state.last_updated", event.new_state.last_updated),
    ] {
        if let Some(ts) = ts
            && let Some(reason) = timestamp_out_of_window(ts, now)
        {
            errors.push(format!("{label} {reason}"));
        }
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        domain,
        event_type: (!event.event_type.is_empty()).then(|| event.event_type.clone()),
    }
}

/// Returns the domain when the id is a well-formed `domain.object_id`:
/// both parts non-empty, lowercase alphanumeric with underscores.
fn parse_entity_id(entity_id: &str) -> Option<&str> {
    let (domain, object_id) = entity_id.split_once('.')?;
    if domain.is_empty() || object_id.is_empty() {
        return None;
    }
    let well_formed = |part: &str| {
        part.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    };
    (well_formed(domain) && well_formed(object_id)).then_some(domain)
}

fn timestamp_out_of_window(ts: DateTime<Utc>, now: DateTime<Utc>) -> Option<&'static str> {
    if ts.timestamp() < TIMESTAMP_FLOOR_UNIX {
        return Some("is absurdly old");
    }
    if ts - now > TimeDelta::seconds(MAX_FUTURE_SKEW_SECS) {
        return Some("is too far in the future");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use hearth_core::event::{StateChange, StateSnapshot};
    use serde_json::{Map, json};

    fn valid_event(entity_id: &str) -> FlatEvent {
        let now = Utc::now();
        FlatEvent {
            entity_id: entity_id.to_string(),
            event_type: "state_changed".to_string(),
            time_fired: now,
            old_state: None,
            new_state: StateSnapshot {
                state: Some("22.5".to_string()),
                attributes: Map::new(),
                last_changed: Some(now),
                last_updated: Some(now),
            },
            state_change: StateChange {
                from: None,
                to: Some("22.5".to_string()),
                changed: true,
            },
            context_id: None,
        }
    }

    #[test]
    fn test_well_formed_event_passes() {
        let report = validate(&valid_event("sensor.kitchen_temperature"));
        assert!(report.is_valid, "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(report.domain.as_deref(), Some("sensor"));
    }

    #[test]
    fn test_malformed_entity_id_is_an_error_not_a_warning() {
        let report = validate(&valid_event("bad id"));
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("domain.object_id")));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_unknown_domain_is_a_warning_only() {
        let report = validate(&valid_event("custom_widget.thing"));
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("custom_widget"));
        assert_eq!(report.domain.as_deref(), Some("custom_widget"));
    }

    #[test]
    fn test_uppercase_entity_id_rejected() {
        let report = validate(&valid_event("Sensor.Kitchen"));
        assert!(!report.is_valid);
    }

    #[test]
    fn test_missing_event_type_rejected() {
        let mut event = valid_event("sensor.x");
        event.event_type = String::new();
        let report = validate(&event);
        assert!(!report.is_valid);
        assert!(report.event_type.is_none());
    }

    #[test]
    fn test_null_state_rejected_but_empty_string_allowed() {
        let mut event = valid_event("sensor.x");
        event.new_state.state = None;
        assert!(!validate(&event).is_valid);

        let mut event = valid_event("sensor.x");
        event.new_state.state = Some(String::new());
        assert!(validate(&event).is_valid);
    }

    #[test]
    fn test_missing_timestamps_rejected() {
        let mut event = valid_event("sensor.x");
        event.new_state.last_updated = None;
        let report = validate(&event);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("last_updated")));
    }

    #[test]
    fn test_duplicated_identifier_in_attributes_rejected() {
        let mut event = valid_event("sensor.x");
        event
            .new_state
            .attributes
            .insert("entity_id".to_string(), json!("sensor.x"));
        let report = validate(&event);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("duplicated")));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let mut event = valid_event("sensor.x");
        event.time_fired = Utc::now() + TimeDelta::seconds(MAX_FUTURE_SKEW_SECS + 60);
        let report = validate(&event);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("future")));
    }

    #[test]
    fn test_ancient_timestamp_rejected() {
        let mut event = valid_event("sensor.x");
        event.new_state.last_changed =
            Some(DateTime::from_timestamp(100, 0).unwrap());
        let report = validate(&event);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("absurdly old")));
    }

    #[test]
    fn test_errors_keep_check_order() {
        let mut event = valid_event("bad id");
        event.event_type = String::new();
        let report = validate(&event);
        assert!(report.errors[0].contains("entity_id"));
        assert!(report.errors[1].contains("event_type"));
    }
}
