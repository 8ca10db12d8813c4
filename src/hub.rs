//! ==============================================================================
//! hub.rs - config entries and the live instance behind each of them
//! ==============================================================================
//!
//! purpose:
//!     owns the lifecycle of every configured chorecast entry:
//!     setup -> (payloads delivered) -> unload, and reload when options change.
//!
//! responsibilities:
//!     - build an `Instance` (sensor table + latest payload) per entry
//!     - register the five global sensors eagerly at setup
//!     - bind each entry's webhook id so the receiver can find the instance
//!     - hand payloads to the projector and schedule registration of any
//!       sensors it discovered
//!     - replay the latest payload after a reload so sensors repopulate
//!
//! relationships:
//!     - used by: webhook.rs (lookup + deliver), server.rs (entries / options)
//!     - uses: projector.rs, sensor.rs, states.rs
//!
//!     ┌──────────┐  deliver   ┌──────────────────────────┐   write    ┌────────────┐
//!     │ webhook  │ ─────────> │ Instance (Mutex)         │ ─────────> │ StateSink  │
//!     └──────────┘            │  latest + SensorTable    │            └────────────┘
//!                             └────────────┬─────────────┘                  ▲
//!                                          │ discovered keys                │
//!                                          └──── tokio::spawn ── register ──┘
//!
//! ==============================================================================

use crate::domain::{ConfigEntry, EntryData, EntryOptions, Payload};
use crate::projector::{self, Projection};
use crate::sensor::SensorTable;
use crate::states::StateSink;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Error, PartialEq)]
pub enum HubError {
    #[error("unknown entry '{0}'")]
    UnknownEntry(String),
    #[error("entry '{0}' is already set up")]
    AlreadyLoaded(String),
    #[error("webhook id '{webhook_id}' is already used by entry '{entry_id}'")]
    WebhookInUse { webhook_id: String, entry_id: String },
    #[error("only one chorecast entry is allowed")]
    SingleInstance,
}

// ==============================================================================
// instance
// ==============================================================================

pub type SharedInstance = Arc<Mutex<Instance>>;

/// runtime state of one loaded entry
#[derive(Debug)]
pub struct Instance {
    entry_id: String,
    webhook_id: String,
    latest: Option<Payload>,
    sensors: SensorTable,
    unloaded: bool,
}

impl Instance {
    fn setup(entry: &ConfigEntry, sink: &dyn StateSink) -> Self {
        let sensors = SensorTable::with_globals(&entry.entry_id);
        let globals: Vec<_> = sensors.iter().map(|s| s.snapshot()).collect();
        tracing::debug!(entry_id = %entry.entry_id, count = globals.len(), "adding core sensors");
        sink.register(&globals);

        Self {
            entry_id: entry.entry_id.clone(),
            webhook_id: entry.webhook_id(),
            latest: None,
            sensors,
            unloaded: false,
        }
    }

    pub fn webhook_id(&self) -> &str {
        &self.webhook_id
    }

    pub fn latest(&self) -> Option<&Payload> {
        self.latest.as_ref()
    }

    pub fn sensors(&self) -> &SensorTable {
        &self.sensors
    }
}

/// result of handing one payload to an instance
#[derive(Debug)]
pub struct Delivery {
    pub projection: Projection,
    /// pending registration of newly discovered sensors, if any
    pub registration: Option<JoinHandle<()>>,
}

// ==============================================================================
// hub
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub entry_id: String,
    pub title: String,
    pub webhook_id: String,
    pub loaded: bool,
    pub sensors: usize,
    pub has_payload: bool,
}

#[derive(Default)]
struct HubInner {
    entries: BTreeMap<String, ConfigEntry>,
    instances: BTreeMap<String, SharedInstance>,
    /// webhook id -> entry id, for loaded entries only
    webhooks: HashMap<String, String>,
}

/// clone-able handle shared by the web server and startup code
#[derive(Clone)]
pub struct Hub {
    inner: Arc<RwLock<HubInner>>,
    sink: Arc<dyn StateSink>,
    show_payloads: bool,
}

impl Hub {
    pub fn new(sink: Arc<dyn StateSink>, show_payloads: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HubInner::default())),
            sink,
            show_payloads,
        }
    }

    pub fn sink(&self) -> &Arc<dyn StateSink> {
        &self.sink
    }

    /// store a config entry and set it up
    pub async fn add_entry(&self, entry: ConfigEntry) -> Result<(), HubError> {
        self.store_and_setup(entry, false).await
    }

    /// create the entry from the setup step's data
    ///
    /// the "already configured" check and the insert share one write lock,
    /// so two concurrent setup submissions cannot both create an entry.
    pub async fn create_entry(&self, title: &str, data: EntryData) -> Result<ConfigEntry, HubError> {
        let entry = ConfigEntry {
            entry_id: uuid::Uuid::new_v4().simple().to_string(),
            title: title.to_string(),
            data,
            options: EntryOptions::default(),
        };
        self.store_and_setup(entry.clone(), true).await?;
        Ok(entry)
    }

    async fn store_and_setup(&self, entry: ConfigEntry, single_instance: bool) -> Result<(), HubError> {
        let entry_id = entry.entry_id.clone();
        {
            let mut inner = self.inner.write().await;
            if single_instance && !inner.entries.is_empty() {
                return Err(HubError::SingleInstance);
            }
            if inner.entries.contains_key(&entry_id) {
                return Err(HubError::AlreadyLoaded(entry_id));
            }
            inner.entries.insert(entry_id.clone(), entry);
        }
        if let Err(e) = self.setup_entry(&entry_id, None).await {
            self.inner.write().await.entries.remove(&entry_id);
            return Err(e);
        }
        Ok(())
    }

    pub async fn entry(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.inner.read().await.entries.get(entry_id).cloned()
    }

    pub async fn entry_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn entries(&self) -> Vec<EntrySummary> {
        let (entries, instances) = {
            let inner = self.inner.read().await;
            (inner.entries.clone(), inner.instances.clone())
        };

        let mut summaries = Vec::with_capacity(entries.len());
        for (entry_id, entry) in entries {
            let (loaded, sensors, has_payload) = match instances.get(&entry_id) {
                Some(instance) => {
                    let instance = instance.lock().await;
                    (true, instance.sensors().len(), instance.latest().is_some())
                }
                None => (false, 0, false),
            };
            summaries.push(EntrySummary {
                webhook_id: entry.webhook_id(),
                title: entry.title,
                entry_id,
                loaded,
                sensors,
                has_payload,
            });
        }
        summaries
    }

    /// build the instance, register core sensors, bind the webhook
    ///
    /// `replay` is applied right after binding, so a reloaded entry shows
    /// its last known state without waiting for the next webhook.
    pub async fn setup_entry(&self, entry_id: &str, replay: Option<Payload>) -> Result<(), HubError> {
        let instance = {
            let mut inner = self.inner.write().await;
            let entry = inner
                .entries
                .get(entry_id)
                .cloned()
                .ok_or_else(|| HubError::UnknownEntry(entry_id.to_string()))?;
            if inner.instances.contains_key(entry_id) {
                return Err(HubError::AlreadyLoaded(entry_id.to_string()));
            }
            let webhook_id = entry.webhook_id();
            if let Some(owner) = inner.webhooks.get(&webhook_id) {
                return Err(HubError::WebhookInUse {
                    webhook_id,
                    entry_id: owner.clone(),
                });
            }

            let instance = Arc::new(Mutex::new(Instance::setup(&entry, self.sink.as_ref())));
            inner.instances.insert(entry_id.to_string(), instance.clone());
            inner.webhooks.insert(webhook_id.clone(), entry_id.to_string());
            tracing::info!(entry_id = %entry_id, "webhook registered with id '{}'", webhook_id);
            instance
        };

        if let Some(payload) = replay {
            tracing::debug!(entry_id = %entry_id, "replaying latest payload");
            let registration = self.deliver(&instance, payload).await.and_then(|d| d.registration);
            if let Some(registration) = registration {
                if let Err(e) = registration.await {
                    tracing::error!(entry_id = %entry_id, "failed to add replayed sensors: {}", e);
                }
            }
        }
        Ok(())
    }

    /// tear the instance down; returns its latest payload
    pub async fn unload_entry(&self, entry_id: &str) -> Result<Option<Payload>, HubError> {
        let instance = {
            let mut inner = self.inner.write().await;
            if !inner.entries.contains_key(entry_id) {
                return Err(HubError::UnknownEntry(entry_id.to_string()));
            }
            let Some(instance) = inner.instances.remove(entry_id) else {
                return Ok(None);
            };
            inner.webhooks.retain(|_, owner| owner != entry_id);
            instance
        };

        let mut instance = instance.lock().await;
        instance.unloaded = true;
        self.sink.remove_entry(entry_id);
        tracing::info!(entry_id = %entry_id, "webhook '{}' unregistered", instance.webhook_id());
        Ok(instance.latest.take())
    }

    /// unload and set up again under unchanged options, carrying the latest payload
    #[cfg(test)]
    pub async fn reload_entry(&self, entry_id: &str) -> Result<(), HubError> {
        self.reload_or_restore(entry_id, None).await
    }

    /// store new options and reload the entry under them
    pub async fn update_options(&self, entry_id: &str, options: EntryOptions) -> Result<(), HubError> {
        let previous = {
            let mut inner = self.inner.write().await;
            let mut updated = inner
                .entries
                .get(entry_id)
                .cloned()
                .ok_or_else(|| HubError::UnknownEntry(entry_id.to_string()))?;
            updated.options = options;

            let webhook_id = updated.webhook_id();
            if let Some(owner) = inner.webhooks.get(&webhook_id) {
                if owner != entry_id {
                    return Err(HubError::WebhookInUse {
                        webhook_id,
                        entry_id: owner.clone(),
                    });
                }
            }
            inner
                .entries
                .insert(entry_id.to_string(), updated)
                .map(|entry| entry.options)
                .unwrap_or_default()
        };
        self.reload_or_restore(entry_id, Some(previous)).await
    }

    /// reload under the stored options; on failure put `previous` back
    /// and set the entry up again with its latest payload
    async fn reload_or_restore(&self, entry_id: &str, previous: Option<EntryOptions>) -> Result<(), HubError> {
        let latest = self.unload_entry(entry_id).await?;
        let Err(e) = self.setup_entry(entry_id, latest.clone()).await else {
            return Ok(());
        };
        let Some(previous) = previous else {
            tracing::error!(entry_id = %entry_id, "reload failed: {}", e);
            return Err(e);
        };

        tracing::error!(entry_id = %entry_id, "reload with new options failed, restoring previous options: {}", e);
        if let Some(entry) = self.inner.write().await.entries.get_mut(entry_id) {
            entry.options = previous;
        }
        if let Err(restore) = self.setup_entry(entry_id, latest).await {
            tracing::error!(entry_id = %entry_id, "entry left unloaded: {}", restore);
        }
        Err(e)
    }

    /// unload and forget the entry
    pub async fn remove_entry(&self, entry_id: &str) -> Result<(), HubError> {
        self.unload_entry(entry_id).await?;
        self.inner.write().await.entries.remove(entry_id);
        tracing::info!(entry_id = %entry_id, "entry removed");
        Ok(())
    }

    pub async fn instance_for_webhook(&self, webhook_id: &str) -> Option<SharedInstance> {
        let inner = self.inner.read().await;
        let entry_id = inner.webhooks.get(webhook_id)?;
        inner.instances.get(entry_id).cloned()
    }

    /// deliver to whichever instance currently owns `webhook_id`
    ///
    /// an instance looked up just before a reload may be unloaded by the
    /// time its lock is taken; the lookup is then repeated so the payload
    /// lands on the instance that replaced it. `None` once nothing owns the id.
    pub async fn deliver_to_webhook(&self, webhook_id: &str, mut payload: Payload) -> Option<Delivery> {
        loop {
            let instance = self.instance_for_webhook(webhook_id).await?;
            match self.try_deliver(&instance, payload).await {
                Ok(delivery) => return Some(delivery),
                Err(returned) => {
                    tracing::debug!(webhook_id = %webhook_id, "instance unloaded during delivery, looking up again");
                    payload = returned;
                }
            }
        }
    }

    /// store the payload as latest and project it onto the instance
    ///
    /// all value writes happen while the instance is locked; registration of
    /// newly discovered sensors is spawned afterwards and runs once the lock
    /// is released, so it never interleaves with this pass.
    /// `None` if the instance was unloaded; nothing is stored then.
    pub async fn deliver(&self, instance: &SharedInstance, payload: Payload) -> Option<Delivery> {
        self.try_deliver(instance, payload).await.ok()
    }

    /// hands the payload back when the instance is already unloaded
    async fn try_deliver(&self, instance: &SharedInstance, payload: Payload) -> Result<Delivery, Payload> {
        let mut guard = instance.lock().await;
        if guard.unloaded {
            tracing::debug!(entry_id = %guard.entry_id, "instance already unloaded");
            return Err(payload);
        }

        if self.show_payloads {
            tracing::info!(entry_id = %guard.entry_id, ?payload, "chorecast payload received");
        } else {
            tracing::debug!(entry_id = %guard.entry_id, ?payload, "chorecast payload received");
        }

        let projection = projector::project(&mut guard.sensors, self.sink.as_ref(), &payload);
        guard.latest = Some(payload);

        let registration = if projection.discovered.is_empty() {
            None
        } else {
            Some(schedule_registration(
                instance.clone(),
                self.sink.clone(),
                projection.discovered.clone(),
            ))
        };
        Ok(Delivery {
            projection,
            registration,
        })
    }

    /// unload everything, used on shutdown
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.inner.read().await.instances.keys().cloned().collect();
        for entry_id in ids {
            if let Err(e) = self.unload_entry(&entry_id).await {
                tracing::warn!(entry_id = %entry_id, "unload failed: {}", e);
            }
        }
    }
}

fn schedule_registration(
    instance: SharedInstance,
    sink: Arc<dyn StateSink>,
    keys: Vec<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let instance = instance.lock().await;
        if instance.unloaded {
            tracing::debug!(entry_id = %instance.entry_id, "entry unloaded before sensors were added");
            return;
        }
        let states = instance.sensors.snapshots(&keys);
        tracing::debug!(
            entry_id = %instance.entry_id,
            names = ?states.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "adding {} newly discovered sensors",
            states.len()
        );
        sink.register(&states);
    })
}
