//! Messages from entities to the engine.
//!
//! Entities never touch the engine's state directly. Registration and every
//! state write travel over an unbounded channel so that a write issued from a
//! dispatcher callback can never block.

use tokio::sync::mpsc;
use tracing::warn;

use super::device::DeviceInfo;

/// Messages FROM entities (and the registry) TO the engine
#[derive(Debug, Clone)]
pub enum FromEntityMessage {
    /// An entity was accepted into the registry
    EntityAdded {
        entity_id: String,
        unique_id: String,
        platform: &'static str,
        name: Option<String>,
        icon: Option<String>,
        device: Option<DeviceInfo>,
    },

    /// An entity published its current state
    StateWritten {
        entity_id: String,
        available: bool,
        attributes: serde_json::Value,
    },

    /// An entity was detached from the engine
    EntityRemoved { entity_id: String },
}

pub type FromEntitySender = mpsc::UnboundedSender<FromEntityMessage>;
pub type FromEntityReceiver = mpsc::UnboundedReceiver<FromEntityMessage>;

/// Write handle given to an entity when it is added to the engine.
#[derive(Debug, Clone)]
pub struct StateWriter {
    tx: FromEntitySender,
}

impl StateWriter {
    pub fn new(tx: FromEntitySender) -> Self {
        Self { tx }
    }

    /// Publish the entity's current state.
    pub fn write(&self, entity_id: &str, available: bool, attributes: serde_json::Value) {
        let msg = FromEntityMessage::StateWritten {
            entity_id: entity_id.to_string(),
            available,
            attributes,
        };
        if self.tx.send(msg).is_err() {
            warn!("Engine is gone, dropping state write for {}", entity_id);
        }
    }
}
