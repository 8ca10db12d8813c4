//! ==============================================================================
//! projector.rs - maps one chorecast payload onto the entry's sensors
//! ==============================================================================
//!
//! purpose:
//!     turns the loosely shaped daily summary into sensor values. the payload
//!     is never trusted: every field is coerced on its own, and a bad field
//!     only costs that field (or that user), never the whole update.
//!
//! steps, in order:
//!     1. the three totals -> global counter sensors (falsy/missing -> 0)
//!     2. next_due_chore / last_completed_chore -> global chore sensors
//!     3. user_stats_today -> four sensors per user, created on first sight
//!     4. hand back the keys of sensors created during this pass, so the
//!        caller can schedule their registration after all writes are done
//!
//! relationships:
//!     - used by: hub.rs (every received payload, and replay after setup)
//!     - writes through: sensor.rs -> states.rs
//!
//! ==============================================================================

use crate::domain::{
    Attributes, Payload, KEY_LAST_COMPLETED, KEY_NEXT_DUE, KEY_TOTAL_COMPLETED, KEY_TOTAL_DUE,
    KEY_TOTAL_MISSED, KEY_USER_STATS,
};
use crate::sensor::{
    GlobalSensor, SensorTable, UserMetric, LAST_COMPLETED, NEXT_DUE, TOTAL_COMPLETED, TOTAL_DUE,
    TOTAL_MISSED,
};
use crate::states::StateSink;

use serde_json::{json, Value};

/// display value for a missing chore reference
pub const NO_CHORE: &str = "None";

/// outcome of one projection pass
#[derive(Debug, Default, PartialEq)]
pub struct Projection {
    /// table keys of sensors created during this pass, in creation order
    pub discovered: Vec<String>,
    /// users whose stats were applied
    pub users: Vec<String>,
    /// users dropped because their stats were not an object
    pub skipped_users: Vec<String>,
}

// ==============================================================================
// value coercion
// ==============================================================================

/// json's notion of "nothing": null, false, 0, "", [] and {}
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// strings holding json are decoded; anything else (or undecodable) is kept
pub fn maybe_json(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// an object-valued field, decoded from a string if needed, `{}` otherwise
pub fn object_or_empty(value: Option<&Value>) -> Attributes {
    match value.filter(|v| !is_falsy(v)).map(maybe_json) {
        Some(Value::Object(map)) => map,
        _ => Attributes::new(),
    }
}

/// a counter, with missing and falsy values read as 0
pub fn count_or_zero(value: Option<&Value>) -> Value {
    match value {
        Some(v) if !is_falsy(v) => v.clone(),
        _ => json!(0),
    }
}

/// `chore_name` if it carries anything, else "None"
pub fn chore_display(chore: &Attributes) -> String {
    match chore.get("chore_name") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        Some(other @ (Value::Number(_) | Value::Bool(_))) if !is_falsy(other) => other.to_string(),
        _ => NO_CHORE.to_string(),
    }
}

// ==============================================================================
// projection
// ==============================================================================

/// apply one payload to the table, publishing every value to `sink`
pub fn project(table: &mut SensorTable, sink: &dyn StateSink, payload: &Payload) -> Projection {
    let mut projection = Projection::default();

    // --- global totals ---
    for (def, key) in [
        (&TOTAL_COMPLETED, KEY_TOTAL_COMPLETED),
        (&TOTAL_MISSED, KEY_TOTAL_MISSED),
        (&TOTAL_DUE, KEY_TOTAL_DUE),
    ] {
        write_global(table, sink, def, count_or_zero(payload.get(key)), Attributes::new());
    }

    // --- global chore references ---
    for (def, key) in [(&NEXT_DUE, KEY_NEXT_DUE), (&LAST_COMPLETED, KEY_LAST_COMPLETED)] {
        let chore = object_or_empty(payload.get(key));
        let display = chore_display(&chore);
        write_global(table, sink, def, json!(display), chore);
    }

    // --- per-user sensors ---
    let user_stats = match payload.get(KEY_USER_STATS).filter(|v| !is_falsy(v)).map(maybe_json) {
        None => return projection,
        Some(parsed) if is_falsy(&parsed) => return projection,
        Some(Value::Object(map)) => map,
        Some(other) => {
            tracing::warn!("user_stats_today not an object after parsing: {}", other);
            return projection;
        }
    };

    for (user, raw_stats) in &user_stats {
        let stats = match maybe_json(raw_stats) {
            parsed if is_falsy(&parsed) => Attributes::new(),
            Value::Object(map) => map,
            other => {
                tracing::debug!(user = %user, "skipping user, stats not an object: {}", other);
                projection.skipped_users.push(user.clone());
                continue;
            }
        };

        tracing::debug!(user = %user, ?stats, "processing user stats");
        for metric in UserMetric::ALL {
            let (state, attributes) = user_value(user, metric, &stats);
            let (sensor, created) = table.user_sensor(user, metric);
            if created {
                tracing::info!(
                    key = %sensor.key(),
                    unique_id = %sensor.unique_id(),
                    "discovered new sensor for user {}",
                    metric.suffix()
                );
                projection.discovered.push(sensor.key().to_string());
            }
            sensor.write(state, attributes, sink);
        }
        projection.users.push(user.clone());
    }

    projection
}

fn write_global(
    table: &mut SensorTable,
    sink: &dyn StateSink,
    def: &GlobalSensor,
    state: Value,
    attributes: Attributes,
) {
    match table.get_mut(&def.key()) {
        Some(sensor) => sensor.write(state, attributes, sink),
        None => tracing::debug!("global sensor {} missing from table", def.suffix),
    }
}

fn user_value(user: &str, metric: UserMetric, stats: &Attributes) -> (Value, Attributes) {
    match metric {
        UserMetric::Completed | UserMetric::Missed => {
            let count = stats
                .get(metric.suffix())
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| json!(0));
            (count, Attributes::new())
        }
        UserMetric::NextDue | UserMetric::LastCompleted => {
            let chore = object_or_empty(stats.get(metric.suffix()));
            let display = chore_display(&chore);
            let mut attributes = Attributes::new();
            attributes.insert("user".to_string(), json!(user));
            attributes.extend(chore);
            (json!(display), attributes)
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::states::MemoryStates;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("test payload must be an object, got {other}"),
        }
    }

    fn state_of(table: &SensorTable, key: &str) -> Value {
        table.get(key).unwrap().state().clone()
    }

    fn attrs_of(table: &SensorTable, key: &str) -> Value {
        Value::Object(table.get(key).unwrap().attributes().clone())
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let mut table = SensorTable::with_globals("e1");
        let sink = MemoryStates::new();
        let result = project(&mut table, &sink, &Payload::new());

        assert!(result.discovered.is_empty());
        assert_eq!(state_of(&table, "chorecast_total_due_today"), json!(0));
        assert_eq!(state_of(&table, "chorecast_total_completed_today"), json!(0));
        assert_eq!(state_of(&table, "chorecast_total_missed_today"), json!(0));
        assert_eq!(state_of(&table, "chorecast_next_due"), json!("None"));
        assert_eq!(attrs_of(&table, "chorecast_next_due"), json!({}));
        assert_eq!(state_of(&table, "chorecast_last_completed"), json!("None"));
    }

    #[test]
    fn test_string_encoded_chore_matches_object_form() {
        let sink = MemoryStates::new();
        let mut from_string = SensorTable::with_globals("e1");
        let mut from_object = SensorTable::with_globals("e1");

        project(
            &mut from_string,
            &sink,
            &payload(json!({ "next_due_chore": "{\"chore_name\": \"Dishes\"}" })),
        );
        project(
            &mut from_object,
            &sink,
            &payload(json!({ "next_due_chore": { "chore_name": "Dishes" } })),
        );

        assert_eq!(state_of(&from_string, "chorecast_next_due"), json!("Dishes"));
        assert_eq!(attrs_of(&from_string, "chorecast_next_due"), json!({ "chore_name": "Dishes" }));
        assert_eq!(
            attrs_of(&from_string, "chorecast_next_due"),
            attrs_of(&from_object, "chorecast_next_due")
        );
    }

    #[test]
    fn test_unparsable_chore_string_becomes_empty() {
        let mut table = SensorTable::with_globals("e1");
        let sink = MemoryStates::new();
        project(&mut table, &sink, &payload(json!({ "last_completed_chore": "not json", "next_due_chore": [1, 2] })));

        assert_eq!(state_of(&table, "chorecast_last_completed"), json!("None"));
        assert_eq!(attrs_of(&table, "chorecast_last_completed"), json!({}));
        assert_eq!(state_of(&table, "chorecast_next_due"), json!("None"));
    }

    #[test]
    fn test_end_to_end_example() {
        let mut table = SensorTable::with_globals("e1");
        let sink = MemoryStates::new();
        let result = project(
            &mut table,
            &sink,
            &payload(json!({
                "total_chores_completed_today": 3,
                "user_stats_today": { "Alice": { "completed": 2, "missed": 1 } }
            })),
        );

        assert_eq!(state_of(&table, "chorecast_total_completed_today"), json!(3));
        assert_eq!(state_of(&table, "chorecast_alice_completed"), json!(2));
        assert_eq!(state_of(&table, "chorecast_alice_missed"), json!(1));
        assert_eq!(state_of(&table, "chorecast_alice_next_due"), json!("None"));
        assert_eq!(attrs_of(&table, "chorecast_alice_next_due"), json!({ "user": "Alice" }));
        assert_eq!(state_of(&table, "chorecast_next_due"), json!("None"));
        assert_eq!(state_of(&table, "chorecast_last_completed"), json!("None"));
        assert_eq!(
            result.discovered,
            vec![
                "chorecast_alice_completed",
                "chorecast_alice_missed",
                "chorecast_alice_next_due",
                "chorecast_alice_last_completed",
            ]
        );
    }

    #[test]
    fn test_user_chore_attributes_include_user() {
        let mut table = SensorTable::with_globals("e1");
        let sink = MemoryStates::new();
        project(
            &mut table,
            &sink,
            &payload(json!({
                "user_stats_today": {
                    "Bob": {
                        "last_completed": "{\"chore_name\": \"Laundry\", \"completion_time\": \"2024-05-01T10:00:00\"}",
                        "next_due": { "chore_name": "Trash", "due_time": "2024-05-01T18:00:00" }
                    }
                }
            })),
        );

        assert_eq!(state_of(&table, "chorecast_bob_last_completed"), json!("Laundry"));
        assert_eq!(
            attrs_of(&table, "chorecast_bob_last_completed"),
            json!({ "user": "Bob", "chore_name": "Laundry", "completion_time": "2024-05-01T10:00:00" })
        );
        assert_eq!(state_of(&table, "chorecast_bob_next_due"), json!("Trash"));
        assert_eq!(state_of(&table, "chorecast_bob_completed"), json!(0));
    }

    #[test]
    fn test_same_payload_twice_is_idempotent() {
        let mut table = SensorTable::with_globals("e1");
        let sink = MemoryStates::new();
        let body = payload(json!({
            "total_chores_due_today": 4,
            "user_stats_today": { "Alice": { "completed": 1 } }
        }));

        let first = project(&mut table, &sink, &body);
        let before: Vec<_> = table.iter().map(|s| s.snapshot()).collect();
        let second = project(&mut table, &sink, &body);
        let after: Vec<_> = table.iter().map(|s| s.snapshot()).collect();

        assert_eq!(first.discovered.len(), 4);
        assert!(second.discovered.is_empty());
        assert_eq!(before, after);
    }

    #[test]
    fn test_users_are_never_removed() {
        let mut table = SensorTable::with_globals("e1");
        let sink = MemoryStates::new();
        project(&mut table, &sink, &payload(json!({ "user_stats_today": { "Alice": { "completed": 5 } } })));
        project(&mut table, &sink, &payload(json!({ "user_stats_today": { "Bob": { "completed": 1 } } })));

        assert_eq!(table.len(), 5 + 8);
        assert_eq!(state_of(&table, "chorecast_alice_completed"), json!(5));
    }

    #[test]
    fn test_bad_user_is_skipped_alone() {
        let mut table = SensorTable::with_globals("e1");
        let sink = MemoryStates::new();
        let result = project(
            &mut table,
            &sink,
            &payload(json!({
                "total_chores_due_today": 2,
                "user_stats_today": { "Alice": "garbage", "Bob": { "missed": 2 } }
            })),
        );

        assert_eq!(result.skipped_users, vec!["Alice".to_string()]);
        assert_eq!(result.users, vec!["Bob".to_string()]);
        assert!(!table.contains("chorecast_alice_completed"));
        assert_eq!(state_of(&table, "chorecast_bob_missed"), json!(2));
        assert_eq!(state_of(&table, "chorecast_total_due_today"), json!(2));
    }

    #[test]
    fn test_non_object_user_stats_aborts_only_user_step() {
        let mut table = SensorTable::with_globals("e1");
        let sink = MemoryStates::new();
        let result = project(
            &mut table,
            &sink,
            &payload(json!({ "total_chores_missed_today": 1, "user_stats_today": [1, 2] })),
        );

        assert!(result.users.is_empty());
        assert_eq!(table.len(), 5);
        assert_eq!(state_of(&table, "chorecast_total_missed_today"), json!(1));
    }

    #[test]
    fn test_string_encoded_user_stats() {
        let mut table = SensorTable::with_globals("e1");
        let sink = MemoryStates::new();
        project(
            &mut table,
            &sink,
            &payload(json!({ "user_stats_today": "{\"Carol\": \"{\\\"completed\\\": 3}\"}" })),
        );

        assert_eq!(state_of(&table, "chorecast_carol_completed"), json!(3));
    }

    #[test]
    fn test_missing_global_sensor_is_skipped() {
        let mut table = SensorTable::new("e1");
        let sink = MemoryStates::new();
        let result = project(
            &mut table,
            &sink,
            &payload(json!({ "total_chores_due_today": 1, "user_stats_today": { "Dan": {} } })),
        );

        assert_eq!(result.discovered.len(), 4);
        assert!(!table.contains("chorecast_total_due_today"));
    }

    #[test]
    fn test_coercion_helpers() {
        assert_eq!(count_or_zero(None), json!(0));
        assert_eq!(count_or_zero(Some(&json!(null))), json!(0));
        assert_eq!(count_or_zero(Some(&json!(false))), json!(0));
        assert_eq!(count_or_zero(Some(&json!(7))), json!(7));
        assert_eq!(maybe_json(&json!("[1]")), json!([1]));
        assert_eq!(maybe_json(&json!("plain")), json!("plain"));

        let mut chore = Attributes::new();
        assert_eq!(chore_display(&chore), "None");
        chore.insert("chore_name".to_string(), json!(""));
        assert_eq!(chore_display(&chore), "None");
        chore.insert("chore_name".to_string(), json!(null));
        assert_eq!(chore_display(&chore), "None");
    }
}
