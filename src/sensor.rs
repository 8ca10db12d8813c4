//! ==============================================================================
//! sensor.rs - sensor records, their stable keys and the per-entry table
//! ==============================================================================
//!
//! purpose:
//!     every value chorecast reports lands in a `Sensor`. sensors live in a
//!     `SensorTable` owned by one configured entry and are looked up by a key
//!     derived only from (category, user name), so the same payload always
//!     maps onto the same sensors, across restarts too.
//!
//! key layout:
//!     table key:  chorecast_{suffix}                 (global)
//!                 chorecast_{slug(user)}_{metric}    (per user)
//!     unique id:  {entry_id}_{table key}
//!
//! ==============================================================================

use crate::domain::{Attributes, DeviceInfo, SensorState, DOMAIN};
use crate::states::StateSink;

use serde_json::Value;
use std::collections::BTreeMap;

const UNIT_CHORES: &str = "chores";

// ==============================================================================
// key derivation
// ==============================================================================

/// lowercase, every non-alphanumeric char becomes `_`, outer `_` trimmed
pub fn slug(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

pub fn global_key(suffix: &str) -> String {
    format!("{DOMAIN}_{suffix}")
}

pub fn user_key(user: &str, metric: UserMetric) -> String {
    format!("{DOMAIN}_{}_{}", slug(user), metric.suffix())
}

pub fn unique_id(entry_id: &str, key: &str) -> String {
    format!("{entry_id}_{key}")
}

// ==============================================================================
// descriptors
// ==============================================================================

/// static metadata of one of the five instance-wide sensors
#[derive(Clone, Copy, Debug)]
pub struct GlobalSensor {
    pub suffix: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub unit: Option<&'static str>,
}

pub const TOTAL_DUE: GlobalSensor = GlobalSensor {
    suffix: "total_due_today",
    name: "Chorecast Total Due Today",
    icon: "mdi:calendar-clock",
    unit: Some(UNIT_CHORES),
};

pub const TOTAL_COMPLETED: GlobalSensor = GlobalSensor {
    suffix: "total_completed_today",
    name: "Chorecast Total Completed Today",
    icon: "mdi:check-circle-outline",
    unit: Some(UNIT_CHORES),
};

pub const TOTAL_MISSED: GlobalSensor = GlobalSensor {
    suffix: "total_missed_today",
    name: "Chorecast Total Missed Today",
    icon: "mdi:alert-circle-outline",
    unit: Some(UNIT_CHORES),
};

pub const NEXT_DUE: GlobalSensor = GlobalSensor {
    suffix: "next_due",
    name: "Chorecast Next Due",
    icon: "mdi:calendar-clock-outline",
    unit: None,
};

pub const LAST_COMPLETED: GlobalSensor = GlobalSensor {
    suffix: "last_completed",
    name: "Chorecast Last Completed",
    icon: "mdi:check-all",
    unit: None,
};

/// created eagerly, in this order, when an entry is set up
pub const GLOBAL_SENSORS: [GlobalSensor; 5] =
    [TOTAL_DUE, TOTAL_COMPLETED, TOTAL_MISSED, NEXT_DUE, LAST_COMPLETED];

impl GlobalSensor {
    pub fn key(&self) -> String {
        global_key(self.suffix)
    }
}

/// the four sensors discovered for every user name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserMetric {
    Completed,
    Missed,
    NextDue,
    LastCompleted,
}

impl UserMetric {
    pub const ALL: [UserMetric; 4] = [
        UserMetric::Completed,
        UserMetric::Missed,
        UserMetric::NextDue,
        UserMetric::LastCompleted,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            UserMetric::Completed => "completed",
            UserMetric::Missed => "missed",
            UserMetric::NextDue => "next_due",
            UserMetric::LastCompleted => "last_completed",
        }
    }

    pub fn display_name(self, user: &str) -> String {
        match self {
            UserMetric::Completed => format!("Chorecast {user} Completed"),
            UserMetric::Missed => format!("Chorecast {user} Missed"),
            UserMetric::NextDue => format!("{user} Next Due"),
            UserMetric::LastCompleted => format!("Chorecast {user} Last Completed"),
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            UserMetric::Completed => "mdi:account-check",
            UserMetric::Missed => "mdi:account-alert",
            UserMetric::NextDue => "mdi:calendar-clock",
            UserMetric::LastCompleted => "mdi:history",
        }
    }

    pub fn unit(self) -> Option<&'static str> {
        match self {
            UserMetric::Completed | UserMetric::Missed => Some(UNIT_CHORES),
            UserMetric::NextDue | UserMetric::LastCompleted => None,
        }
    }
}

// ==============================================================================
// sensor record
// ==============================================================================

#[derive(Clone, Debug)]
pub struct Sensor {
    key: String,
    entry_id: String,
    unique_id: String,
    name: String,
    icon: Option<String>,
    unit: Option<String>,
    state: Value,
    attributes: Attributes,
}

impl Sensor {
    pub fn new(entry_id: &str, key: String, name: String, icon: &str, unit: Option<&str>) -> Self {
        Self {
            unique_id: unique_id(entry_id, &key),
            entry_id: entry_id.to_string(),
            key,
            name,
            icon: Some(icon.to_string()),
            unit: unit.map(str::to_string),
            state: Value::Null,
            attributes: Attributes::new(),
        }
    }

    pub fn global(entry_id: &str, def: &GlobalSensor) -> Self {
        Self::new(entry_id, def.key(), def.name.to_string(), def.icon, def.unit)
    }

    pub fn for_user(entry_id: &str, user: &str, metric: UserMetric) -> Self {
        Self::new(
            entry_id,
            user_key(user, metric),
            metric.display_name(user),
            metric.icon(),
            metric.unit(),
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    #[cfg(test)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub fn state(&self) -> &Value {
        &self.state
    }

    #[cfg(test)]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// overwrite value and attributes, then publish
    ///
    /// the in-memory record is always updated. a sink failure (typically a
    /// sensor whose registration is still scheduled) is logged and dropped;
    /// registration picks up the stored value later.
    pub fn write(&mut self, state: Value, attributes: Attributes, sink: &dyn StateSink) {
        self.state = state;
        self.attributes = attributes;
        if let Err(e) = sink.write(&self.snapshot()) {
            tracing::debug!(sensor = %self.name, "state not published: {:#}", e);
        }
    }

    pub fn snapshot(&self) -> SensorState {
        SensorState {
            unique_id: self.unique_id.clone(),
            entry_id: self.entry_id.clone(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            unit: self.unit.clone(),
            state: self.state.clone(),
            attributes: self.attributes.clone(),
            device: DeviceInfo::for_entry(&self.entry_id),
        }
    }
}

// ==============================================================================
// sensor table
// ==============================================================================

/// every sensor an entry owns, keyed by table key
///
/// sensors are only ever added; a user that stops appearing in payloads
/// keeps its sensors until the entry is unloaded.
#[derive(Debug)]
pub struct SensorTable {
    entry_id: String,
    sensors: BTreeMap<String, Sensor>,
}

impl SensorTable {
    pub fn new(entry_id: &str) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            sensors: BTreeMap::new(),
        }
    }

    /// table pre-filled with the five global sensors
    pub fn with_globals(entry_id: &str) -> Self {
        let mut table = Self::new(entry_id);
        for def in &GLOBAL_SENSORS {
            table.insert(Sensor::global(entry_id, def));
        }
        table
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&Sensor> {
        self.sensors.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Sensor> {
        self.sensors.get_mut(key)
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.sensors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// insert unless the key is taken; returns whether it was inserted
    pub fn insert(&mut self, sensor: Sensor) -> bool {
        if self.sensors.contains_key(sensor.key()) {
            return false;
        }
        self.sensors.insert(sensor.key.clone(), sensor);
        true
    }

    /// per-user sensor by key, created on first sight
    ///
    /// returns the sensor and whether it was created by this call.
    pub fn user_sensor(&mut self, user: &str, metric: UserMetric) -> (&mut Sensor, bool) {
        let key = user_key(user, metric);
        let created = !self.sensors.contains_key(&key);
        let entry_id = self.entry_id.clone();
        let sensor = self
            .sensors
            .entry(key)
            .or_insert_with(|| Sensor::for_user(&entry_id, user, metric));
        (sensor, created)
    }

    pub fn snapshots<'a, I>(&self, keys: I) -> Vec<SensorState>
    where
        I: IntoIterator<Item = &'a String>,
    {
        keys.into_iter()
            .filter_map(|key| self.sensors.get(key))
            .map(Sensor::snapshot)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.values()
    }
}
