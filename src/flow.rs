//! ==============================================================================
//! flow.rs - setup and options steps for a chorecast entry
//! ==============================================================================
//!
//! purpose:
//!     the only thing a user configures is the webhook id. setup collects it
//!     once (a single entry is allowed); the options step lets it be changed
//!     later, after which the hub reloads the entry under the new id.
//!
//! ==============================================================================

use crate::domain::{ConfigEntry, DEFAULT_WEBHOOK_ID};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ENTRY_TITLE: &str = "Chorecast";

/// user input for both steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInput {
    pub webhook_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    pub required: bool,
    pub default: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        step_id: String,
        fields: Vec<FormField>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        errors: BTreeMap<String, String>,
    },
    CreateEntry {
        title: String,
        data: FlowInput,
    },
    Abort {
        reason: String,
    },
}

fn webhook_form(step_id: &str, default: &str, errors: BTreeMap<String, String>) -> FlowResult {
    FlowResult::Form {
        step_id: step_id.to_string(),
        fields: vec![FormField {
            name: "webhook_id".to_string(),
            required: true,
            default: default.to_string(),
        }],
        errors,
    }
}

/// trimmed input, or the form to show again when it is blank
fn validate(step_id: &str, default: &str, input: FlowInput) -> Result<FlowInput, FlowResult> {
    let webhook_id = input.webhook_id.trim();
    if webhook_id.is_empty() {
        let errors = BTreeMap::from([("webhook_id".to_string(), "invalid_webhook_id".to_string())]);
        return Err(webhook_form(step_id, default, errors));
    }
    Ok(FlowInput {
        webhook_id: webhook_id.to_string(),
    })
}

pub struct ConfigFlow;

impl ConfigFlow {
    pub fn already_configured() -> FlowResult {
        FlowResult::Abort {
            reason: "single_instance_allowed".to_string(),
        }
    }

    pub fn step_user(existing_entries: usize, input: Option<FlowInput>) -> FlowResult {
        if existing_entries > 0 {
            return Self::already_configured();
        }

        match input {
            None => webhook_form("user", DEFAULT_WEBHOOK_ID, BTreeMap::new()),
            Some(input) => match validate("user", DEFAULT_WEBHOOK_ID, input) {
                Ok(data) => FlowResult::CreateEntry {
                    title: ENTRY_TITLE.to_string(),
                    data,
                },
                Err(form) => form,
            },
        }
    }
}

pub struct OptionsFlow;

impl OptionsFlow {
    pub fn step_init(entry: &ConfigEntry, input: Option<FlowInput>) -> FlowResult {
        let current = entry.webhook_id();
        match input {
            None => webhook_form("init", &current, BTreeMap::new()),
            Some(input) => match validate("init", &current, input) {
                Ok(data) => FlowResult::CreateEntry {
                    title: String::new(),
                    data,
                },
                Err(form) => form,
            },
        }
    }
}
