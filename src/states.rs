//! ==============================================================================
//! states.rs - display layer that sensor states are published to
//! ==============================================================================
//!
//! purpose:
//!     the projector never renders anything itself. it registers sensors and
//!     writes their values through `StateSink`, which stands in for whatever
//!     automation/dashboard layer sits on top.
//!
//! relationships:
//!     - used by: sensor.rs (write), hub.rs (register, remove_entry)
//!     - read by: server.rs (GET /api/states)
//!
//! ==============================================================================

use crate::domain::SensorState;

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

pub trait StateSink: Send + Sync {
    /// make sensors visible; an already registered id is refreshed in place
    fn register(&self, sensors: &[SensorState]);
    /// publish a new value; fails for sensors that are not registered yet
    fn write(&self, state: &SensorState) -> Result<()>;
    /// drop every sensor belonging to an unloaded entry
    fn remove_entry(&self, entry_id: &str);
    /// everything currently registered, ordered by unique id
    fn snapshot(&self) -> Vec<SensorState>;
}

/// in-process state machine keyed by unique id
#[derive(Default)]
pub struct MemoryStates {
    states: RwLock<BTreeMap<String, SensorState>>,
}

impl MemoryStates {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, unique_id: &str) -> Option<SensorState> {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(unique_id)
            .cloned()
    }
}

impl StateSink for MemoryStates {
    fn register(&self, sensors: &[SensorState]) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        for sensor in sensors {
            tracing::debug!(unique_id = %sensor.unique_id, name = %sensor.name, "registered sensor");
            states.insert(sensor.unique_id.clone(), sensor.clone());
        }
    }

    fn write(&self, state: &SensorState) -> Result<()> {
        let mut states = self
            .states
            .write()
            .map_err(|_| anyhow!("state store lock poisoned"))?;
        match states.get_mut(&state.unique_id) {
            Some(slot) => {
                *slot = state.clone();
                Ok(())
            }
            None => Err(anyhow!("sensor {} is not registered", state.unique_id)),
        }
    }

    fn remove_entry(&self, entry_id: &str) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.retain(|_, state| state.entry_id != entry_id);
    }

    fn snapshot(&self) -> Vec<SensorState> {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}
