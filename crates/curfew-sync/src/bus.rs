//! # Home-Automation Bus
//!
//! The message bus is consumed through the [`Bus`] trait. The bridge
//! announces every entity once, publishes retained state per entity, and
//! receives commands as `{unique id, payload, arrival sequence}`.
//!
//! ## Naming
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  unique id   = <child_slug>_<object_id>                                 │
//! │                                                                         │
//! │  emma_limit_monday          switch   ON / OFF                           │
//! │  emma_minutes_monday        number   decimal minutes                    │
//! │  emma_bulk_school_nights    number   decimal minutes (fan-out)          │
//! │  emma_schedule_friday_end   text     HH:MM                              │
//! │  emma_block_button          button   PRESS                              │
//! │  emma_usage                 sensor   JSON document                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use curfew_core::{Component, EntityDescriptor, EntityId, MinuteGrid, ValueDomain};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::{SyncError, SyncResult};

/// Inbound command buffer per subscription.
pub const COMMAND_BUFFER: usize = 256;

// =============================================================================
// Contract
// =============================================================================

/// A command as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusCommand {
    pub unique_id: String,
    pub payload: String,
    /// Monotonic arrival order assigned by the bus.
    pub sequence: u64,
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Publishes a discovery document for one entity.
    async fn announce(&self, announcement: &Announcement) -> SyncResult<()>;

    /// Publishes a state payload, retained as the entity's last value.
    async fn publish(&self, unique_id: &str, payload: &str, retain: bool) -> SyncResult<()>;

    /// Subscribes to commands for the given unique ids.
    async fn subscribe(&self, unique_ids: Vec<String>) -> SyncResult<mpsc::Receiver<BusCommand>>;
}

// =============================================================================
// Naming
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityNaming {
    pub child_slug: String,
    pub discovery_prefix: String,
    pub device_name: String,
}

impl EntityNaming {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            child_slug: config.child.slug(),
            discovery_prefix: config.bus.discovery_prefix.clone(),
            device_name: config.bus.device_name.clone(),
        }
    }

    pub fn unique_id(&self, entity: &EntityId) -> String {
        format!("{}_{}", self.child_slug, entity.object_id())
    }

    /// Resolves a unique id back to an entity of this child.
    pub fn parse(&self, unique_id: &str) -> Option<EntityId> {
        let object_id = unique_id
            .strip_prefix(self.child_slug.as_str())?
            .strip_prefix('_')?;
        EntityId::parse(object_id).ok()
    }

    pub fn state_topic(&self, component: Component, unique_id: &str) -> String {
        format!(
            "{}/{}/{}/state",
            self.discovery_prefix,
            component.as_str(),
            unique_id
        )
    }

    pub fn command_topic(&self, component: Component, unique_id: &str) -> String {
        format!(
            "{}/{}/{}/set",
            self.discovery_prefix,
            component.as_str(),
            unique_id
        )
    }

    pub fn announcement(&self, entity: &EntityId, grid: &MinuteGrid) -> Announcement {
        let descriptor = entity.descriptor(grid);
        let unique_id = self.unique_id(entity);
        let config = self.discovery_document(&descriptor, &unique_id);
        Announcement {
            unique_id,
            descriptor,
            config,
        }
    }

    fn discovery_document(&self, descriptor: &EntityDescriptor, unique_id: &str) -> Value {
        let component = descriptor.component;
        let mut doc = json!({
            "name": descriptor.label,
            "unique_id": unique_id,
            "object_id": unique_id,
            "component": component.as_str(),
            "icon": descriptor.icon,
            "state_topic": self.state_topic(component, unique_id),
            "device": {
                "identifiers": [format!("{}_{}", self.child_slug, descriptor.group.slug())],
                "name": format!("{} {}", self.device_name, descriptor.group.label()),
            },
        });

        if descriptor.id.is_commandable() {
            doc["command_topic"] = json!(self.command_topic(component, unique_id));
        }

        match descriptor.domain {
            ValueDomain::Boolean => {
                doc["payload_on"] = json!("ON");
                doc["payload_off"] = json!("OFF");
            }
            ValueDomain::Integer {
                min,
                max,
                step,
                unit,
            } => {
                doc["min"] = json!(min);
                doc["max"] = json!(max);
                doc["step"] = json!(step);
                doc["unit_of_measurement"] = json!(unit);
                doc["mode"] = json!("box");
            }
            ValueDomain::Time => {
                doc["pattern"] = json!("^([01][0-9]|2[0-3]):[0-5][0-9]$");
            }
            ValueDomain::Trigger => {
                doc["payload_press"] = json!("PRESS");
            }
            ValueDomain::Reading { unit } => {
                doc["value_template"] = json!(value_template(&descriptor.id));
                doc["json_attributes_topic"] = json!(self.state_topic(component, unique_id));
                if let Some(unit) = unit {
                    doc["unit_of_measurement"] = json!(unit);
                }
            }
        }
        doc
    }
}

fn value_template(entity: &EntityId) -> &'static str {
    match entity {
        EntityId::Usage => "{{ value_json.today_minutes }}",
        EntityId::Viewing => "{{ value_json.latest.title | default('') }}",
        EntityId::Health => "{{ value_json.seconds_since_last_sync }}",
        _ => "{{ value }}",
    }
}

/// A discovery announcement for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub unique_id: String,
    pub descriptor: EntityDescriptor,
    pub config: Value,
}

// =============================================================================
// Memory Bus
// =============================================================================

/// In-process bus keeping retained state in memory. Commands are injected
/// with [`MemoryBus::inject`].
#[derive(Default)]
pub struct MemoryBus {
    announcements: RwLock<HashMap<String, Announcement>>,
    retained: RwLock<HashMap<String, String>>,
    history: RwLock<Vec<(String, String)>>,
    subscriber: Mutex<Option<mpsc::Sender<BusCommand>>>,
    next_sequence: AtomicU64,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a command with the next arrival sequence.
    pub async fn inject(&self, unique_id: &str, payload: &str) -> SyncResult<u64> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.inject_with_sequence(unique_id, payload, sequence)
            .await?;
        Ok(sequence)
    }

    /// Delivers a command carrying an explicit sequence.
    pub async fn inject_with_sequence(
        &self,
        unique_id: &str,
        payload: &str,
        sequence: u64,
    ) -> SyncResult<()> {
        self.next_sequence.fetch_max(sequence, Ordering::SeqCst);
        let sender = self
            .subscriber
            .lock()
            .await
            .clone()
            .ok_or_else(|| SyncError::BusError("no subscriber".into()))?;
        sender
            .send(BusCommand {
                unique_id: unique_id.to_string(),
                payload: payload.to_string(),
                sequence,
            })
            .await
            .map_err(|e| SyncError::ChannelError(e.to_string()))
    }

    pub async fn retained(&self, unique_id: &str) -> Option<String> {
        self.retained.read().await.get(unique_id).cloned()
    }

    pub async fn announcement(&self, unique_id: &str) -> Option<Announcement> {
        self.announcements.read().await.get(unique_id).cloned()
    }

    pub async fn announcement_count(&self) -> usize {
        self.announcements.read().await.len()
    }

    /// Every publish in order, retained or not.
    pub async fn history(&self) -> Vec<(String, String)> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn announce(&self, announcement: &Announcement) -> SyncResult<()> {
        self.announcements
            .write()
            .await
            .insert(announcement.unique_id.clone(), announcement.clone());
        Ok(())
    }

    async fn publish(&self, unique_id: &str, payload: &str, retain: bool) -> SyncResult<()> {
        debug!(unique_id, payload, retain, "Bus publish");
        if retain {
            self.retained
                .write()
                .await
                .insert(unique_id.to_string(), payload.to_string());
        }
        self.history
            .write()
            .await
            .push((unique_id.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, unique_ids: Vec<String>) -> SyncResult<mpsc::Receiver<BusCommand>> {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        *self.subscriber.lock().await = Some(tx);
        debug!(count = unique_ids.len(), "Bus subscription registered");
        Ok(rx)
    }
}
