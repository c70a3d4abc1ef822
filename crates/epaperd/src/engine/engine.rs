use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::PoisonError;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::dispatch::Dispatcher;
use super::entity::Entity;
use super::entity::EntityContext;
use super::entity::EntitySink;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::SetupContext;
use super::message::FromEntityMessage;
use super::message::FromEntityReceiver;
use super::message::FromEntitySender;
use super::message::StateWriter;
use super::state::EntityRecord;
use super::state::State;

/// The engine's entity collection.
///
/// Platforms hand new entities to the registry through [`EntitySink`]. The
/// registry keeps at most one entity per entity id and wires each accepted
/// entity up to the dispatcher and the engine's state channel.
pub struct EntityRegistry {
    entities: std::sync::Mutex<BTreeMap<String, Arc<dyn Entity>>>,
    dispatcher: Dispatcher,
    tx: FromEntitySender,
}

impl EntityRegistry {
    fn new(dispatcher: Dispatcher, tx: FromEntitySender) -> Self {
        Self {
            entities: std::sync::Mutex::new(BTreeMap::new()),
            dispatcher,
            tx,
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<dyn Entity>> {
        let map = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(entity_id).cloned()
    }

    pub fn entity_ids(&self) -> Vec<String> {
        let map = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        map.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach and forget a single entity.
    pub fn remove(&self, entity_id: &str) -> bool {
        // Take the entity out before calling into it so the lock is not held
        // while its subscriptions are dropped.
        let entity = {
            let mut map = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
            map.remove(entity_id)
        };
        let Some(entity) = entity else {
            return false;
        };

        entity.will_remove_from_engine();
        let msg = FromEntityMessage::EntityRemoved {
            entity_id: entity_id.to_string(),
        };
        if let Err(e) = self.tx.send(msg) {
            warn!("Failed to send EntityRemoved message: {}", e);
        } else {
            info!("Removed entity: {}", entity_id);
        }
        true
    }
}

impl EntitySink for EntityRegistry {
    fn add_entities(&self, entities: Vec<Arc<dyn Entity>>) -> Vec<String> {
        let mut accepted = Vec::with_capacity(entities.len());
        for entity in entities {
            let entity_id = entity.entity_id().to_string();

            {
                let mut map = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
                if map.contains_key(&entity_id) {
                    warn!("Entity {} is already registered, ignoring duplicate", entity_id);
                    continue;
                }
                map.insert(entity_id.clone(), entity.clone());
            }

            let msg = FromEntityMessage::EntityAdded {
                entity_id: entity_id.clone(),
                unique_id: entity.unique_id().to_string(),
                platform: entity.platform(),
                name: entity.name().map(str::to_string),
                icon: entity.icon().map(str::to_string),
                device: entity.device_info().cloned(),
            };
            if let Err(e) = self.tx.send(msg) {
                warn!("Failed to send EntityAdded message: {}", e);
            } else {
                info!("Registered entity: {}", entity_id);
            }

            entity.added_to_engine(EntityContext {
                dispatcher: self.dispatcher.clone(),
                writer: StateWriter::new(self.tx.clone()),
            });
            accepted.push(entity_id);
        }
        accepted
    }
}

/// epaperd engine
///
/// Owns the signal dispatcher, the entity registry and the integrations, and
/// maintains a view of the world with State built from the state writes
/// entities publish.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Signal bus shared with integrations and entities
    dispatcher: Dispatcher,

    /// Every entity currently attached to the engine
    registry: Arc<EntityRegistry>,

    /// Integrations that completed setup, in registration order
    integrations: Mutex<Vec<Box<dyn Integration>>>,

    /// Receive messages from entities
    message_rx: Mutex<FromEntityReceiver>,
}

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new();
        Self {
            state: ArcSwap::new(Arc::default()),
            registry: Arc::new(EntityRegistry::new(dispatcher.clone(), message_tx)),
            dispatcher,
            integrations: Mutex::new(Vec::new()),
            message_rx: Mutex::new(message_rx),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Register integrations from configuration
    ///
    /// Every factory in the integration registry is asked whether it is
    /// configured; the ones that are get set up.
    pub async fn register_integrations_from_config(&self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext {
            config: cfg,
            dispatcher: &self.dispatcher,
        };
        let mut built = Vec::new();
        for constr in super::integration::REGISTRY {
            match constr(&ctx) {
                Ok(Some(i)) => built.push(i),
                Ok(None) => continue,
                Err(e) => {
                    error!("failed to create integration: {:#}", e);
                    continue;
                }
            }
        }

        for integration in built {
            self.register_integration(integration).await;
        }
    }

    /// Set up an integration and keep it until shutdown
    ///
    /// An integration whose setup fails is logged and dropped.
    pub async fn register_integration(&self, mut integration: Box<dyn Integration>) {
        let name = integration.name().to_string();
        let ctx = SetupContext {
            dispatcher: self.dispatcher.clone(),
            entities: self.registry.clone(),
        };

        if let Err(e) = integration.setup(ctx).await {
            warn!("Integration '{}' setup failed: {}", name, e);
            return;
        }

        info!("Integration '{}' set up", name);
        self.integrations.lock().await.push(integration);
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming messages from entities and updates state. Returns
    /// once every sender is gone, which only happens when the engine itself is
    /// being dropped.
    pub async fn run(&self) {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_message(msg);
        }

        info!("Engine shutting down");
    }

    /// Apply every message that is already queued, without waiting for more.
    pub async fn process_pending(&self) -> usize {
        let mut rx = self.message_rx.lock().await;
        let mut handled = 0;
        while let Ok(msg) = rx.try_recv() {
            self.handle_message(msg);
            handled += 1;
        }
        handled
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Fetch the image of an entity.
    ///
    /// `None` if the entity is unknown, is not an image entity, or has no image.
    pub async fn image(&self, entity_id: &str) -> Option<Vec<u8>> {
        let entity = self.registry.get(entity_id)?;
        entity.image().await
    }

    /// Shut down integrations, then detach every entity.
    ///
    /// The resulting `EntityRemoved` messages are applied by `run` or
    /// `process_pending`.
    pub async fn shutdown(&self) {
        let integrations: Vec<_> = self.integrations.lock().await.drain(..).collect();
        for mut integration in integrations {
            let name = integration.name().to_string();
            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        }

        for entity_id in self.registry.entity_ids() {
            self.registry.remove(&entity_id);
        }

        info!("Engine shut down");
    }

    fn handle_message(&self, msg: FromEntityMessage) {
        match msg {
            FromEntityMessage::EntityAdded {
                entity_id,
                unique_id,
                platform,
                name,
                icon,
                device,
            } => {
                debug!("Entity added: {} (unique_id {})", entity_id, unique_id);

                let mut state = State::clone(&self.state.load());
                state.entities.insert(
                    entity_id.clone(),
                    EntityRecord {
                        entity_id,
                        unique_id,
                        platform,
                        name,
                        icon,
                        device,
                        available: false,
                        attributes: serde_json::Value::Null,
                        last_updated: 0,
                    },
                );
                self.state.store(Arc::new(state));
            }
            FromEntityMessage::StateWritten {
                entity_id,
                available,
                attributes,
            } => {
                let mut state = State::clone(&self.state.load());
                let Some(record) = state.entities.get_mut(&entity_id) else {
                    debug!("Ignoring state write for unknown entity {}", entity_id);
                    return;
                };

                if record.available != available {
                    info!(
                        "Entity {} is now {}",
                        entity_id,
                        if available { "available" } else { "unavailable" }
                    );
                }
                record.available = available;
                record.attributes = attributes;
                record.last_updated += 1;
                self.state.store(Arc::new(state));
            }
            FromEntityMessage::EntityRemoved { entity_id } => {
                let mut state = State::clone(&self.state.load());
                if state.entities.remove(&entity_id).is_some() {
                    self.state.store(Arc::new(state));
                }
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
