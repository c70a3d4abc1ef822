//! Entity abstraction for epaperd
//!
//! Every platform entity (currently only images) implements the Entity trait.
//! The engine drives the lifecycle: `added_to_engine` once on registration,
//! `will_remove_from_engine` once on teardown.

use std::sync::Arc;

use async_trait::async_trait;

use super::device::DeviceInfo;
use super::dispatch::Dispatcher;
use super::message::StateWriter;

/// Handles an entity receives when it is added to the engine.
#[derive(Debug, Clone)]
pub struct EntityContext {
    pub dispatcher: Dispatcher,
    pub writer: StateWriter,
}

/// Base trait that all entities must implement
#[async_trait]
pub trait Entity: Send + Sync {
    /// Engine-wide id, e.g. `image.0000021ede1f3b1a_content`
    fn entity_id(&self) -> &str;

    /// Stable id owned by the integration
    fn unique_id(&self) -> &str;

    /// Return the platform type of this entity (e.g. "image")
    fn platform(&self) -> &'static str;

    /// Display name relative to the device, e.g. "Content" for "Kitchen Content"
    fn name(&self) -> Option<&str> {
        None
    }

    fn icon(&self) -> Option<&str> {
        None
    }

    fn device_info(&self) -> Option<&DeviceInfo> {
        None
    }

    fn available(&self) -> bool {
        true
    }

    /// Serialize current state attributes to JSON for Engine storage
    fn state_json(&self) -> serde_json::Value;

    /// Called once the engine has accepted the entity. Subscriptions are made here.
    fn added_to_engine(&self, ctx: EntityContext);

    /// Called before the engine forgets the entity. Every subscription must be
    /// released and no state may be written afterwards.
    fn will_remove_from_engine(&self);

    /// Current image bytes for image entities. `None` means "no image".
    async fn image(&self) -> Option<Vec<u8>> {
        None
    }
}

/// The host's entity collection, as seen by a platform setup routine.
pub trait EntitySink: Send + Sync {
    /// Take ownership of `entities`. Returns the ids of the ones accepted;
    /// an entity whose id is already taken is not.
    fn add_entities(&self, entities: Vec<Arc<dyn Entity>>) -> Vec<String>;
}
