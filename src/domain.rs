//! ==============================================================================
//! domain.rs - shared types for payloads, sensor states and config entries
//! ==============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// integration domain, used as the key prefix and device identifier
pub const DOMAIN: &str = "chorecast";

/// webhook id used when the user accepts the setup default
pub const DEFAULT_WEBHOOK_ID: &str = "chorecast_daily_summary";

// payload keys sent by the chorecast daily summary job
pub const KEY_USER_STATS: &str = "user_stats_today";
pub const KEY_TOTAL_COMPLETED: &str = "total_chores_completed_today";
pub const KEY_TOTAL_MISSED: &str = "total_chores_missed_today";
pub const KEY_TOTAL_DUE: &str = "total_chores_due_today";
pub const KEY_NEXT_DUE: &str = "next_due_chore";
pub const KEY_LAST_COMPLETED: &str = "last_completed_chore";

/// an untyped webhook payload: whatever json object chorecast sent
pub type Payload = Map<String, Value>;

/// auxiliary display attributes attached to a sensor state
pub type Attributes = Map<String, Value>;

/// device every sensor of one entry is grouped under
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn for_entry(entry_id: &str) -> Self {
        Self {
            identifiers: vec![(DOMAIN.to_string(), entry_id.to_string())],
            name: "Chorecast".to_string(),
            manufacturer: "Chorecast".to_string(),
            model: "Webhook".to_string(),
        }
    }
}

/// what the display layer sees for one sensor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    /// stable registry id, `{entry_id}_{key}`
    pub unique_id: String,
    pub entry_id: String,
    pub name: String,
    pub icon: Option<String>,
    pub unit: Option<String>,
    /// primary value; null until the first payload is applied
    pub state: Value,
    pub attributes: Attributes,
    pub device: DeviceInfo,
}

/// data collected by the setup step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryData {
    pub webhook_id: String,
}

/// values changed later through the options step
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
}

/// one configured chorecast instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub title: String,
    pub data: EntryData,
    #[serde(default)]
    pub options: EntryOptions,
}

impl ConfigEntry {
    /// options win over setup data; blanks fall through to the default
    pub fn webhook_id(&self) -> String {
        [self.options.webhook_id.as_deref(), Some(self.data.webhook_id.as_str())]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|id| !id.is_empty())
            .unwrap_or(DEFAULT_WEBHOOK_ID)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(data: &str, options: Option<&str>) -> ConfigEntry {
        ConfigEntry {
            entry_id: "abc".to_string(),
            title: "Chorecast".to_string(),
            data: EntryData { webhook_id: data.to_string() },
            options: EntryOptions { webhook_id: options.map(str::to_string) },
        }
    }

    #[test]
    fn test_options_override_data() {
        assert_eq!(entry("from_setup", Some("from_options")).webhook_id(), "from_options");
        assert_eq!(entry("from_setup", None).webhook_id(), "from_setup");
    }

    #[test]
    fn test_blank_ids_fall_back_to_default() {
        assert_eq!(entry("", Some("  ")).webhook_id(), DEFAULT_WEBHOOK_ID);
    }

    #[test]
    fn test_device_info_is_scoped_to_entry() {
        let device = DeviceInfo::for_entry("abc");
        assert_eq!(device.identifiers, vec![("chorecast".to_string(), "abc".to_string())]);
        assert_eq!(device.model, "Webhook");
    }
}
