mod device;
pub mod dispatch;
// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod engine;
mod entity;
mod integration;
mod message;
pub mod state;

pub use device::DeviceInfo;
pub use dispatch::Dispatcher;
pub use dispatch::Signal;
pub use dispatch::Subscription;
pub use engine::Engine;
pub use engine::EntityRegistry;
pub use entity::Entity;
pub use entity::EntityContext;
pub use entity::EntitySink;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use integration::SetupContext;
pub use message::FromEntityMessage;
pub use message::StateWriter;
pub use state::EntityRecord;
pub use state::State;
