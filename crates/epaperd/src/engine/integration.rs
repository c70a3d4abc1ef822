use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;

use super::dispatch::Dispatcher;
use super::entity::EntitySink;
use crate::config::Config;

/// Result type for integration factory functions
pub type IntegrationFactoryResult = anyhow::Result<Option<Box<dyn Integration>>>;

pub struct IntegrationContext<'a> {
    pub config: &'a Config,
    pub dispatcher: &'a Dispatcher,
}

#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// What an integration gets to work with during setup.
#[derive(Clone)]
pub struct SetupContext {
    pub dispatcher: Dispatcher,
    pub entities: Arc<dyn EntitySink>,
}

/// Integration trait that all integrations must implement
#[async_trait]
pub trait Integration: Send + Sync {
    /// Get the name/identifier of this integration
    fn name(&self) -> &str;

    /// Set up the integration - register platforms, subscribe to signals, etc.
    async fn setup(&mut self, ctx: SetupContext) -> Result<(), Box<dyn Error + Send>>;

    /// Shut down the integration gracefully, releasing every subscription made in setup
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}
