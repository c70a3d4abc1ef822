use std::collections::BTreeMap;

use serde::Serialize;

use super::device::DeviceInfo;

/// Last written state of a single entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub unique_id: String,
    pub platform: &'static str,

    /// Name shown next to the device name, if the entity has one.
    pub name: Option<String>,
    pub icon: Option<String>,

    /// Device the entity belongs to, if the integration declared one.
    pub device: Option<DeviceInfo>,

    /// `false` until the entity writes its first state.
    pub available: bool,

    /// Platform-specific attributes from the last state write.
    pub attributes: serde_json::Value,

    /// Number of state writes seen for this entity.
    pub last_updated: u64,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub entities: BTreeMap<String, EntityRecord>,
}

impl State {
    pub fn get(&self, entity_id: &str) -> Option<&EntityRecord> {
        self.entities.get(entity_id)
    }
}
