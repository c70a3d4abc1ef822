mod config;
mod hub;
mod image;
mod tag_types;
mod util;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
pub use config::Config as OpenEPaperLinkConfig;
pub use config::TagConfig;
pub use hub::Hub;
pub use hub::MemoryHub;
pub use hub::TagData;
pub use image::ImageError;
pub use image::ImagePlatform;
pub use image::ImagePlatformHandle;
pub use image::OpenEPaperLinkImage;
pub use image::setup_entry;
use linkme::distributed_slice;
pub use tag_types::hw_string;
use tracing::info;

use crate::engine;

pub const DOMAIN: &str = "open_epaper_link";

/// Reserved identifier of the access point itself. Never a tag.
pub const AP_MAC: &str = "ap";

pub const MANUFACTURER: &str = "OpenEPaperLink";

/// Prefix of the per-tag image update topic
pub const SIGNAL_TAG_IMAGE_UPDATE: &str = "open_epaper_link_tag_image_update";

/// Fired with the tag MAC as its only argument when a tag is first seen.
pub fn tag_discovered_topic() -> String {
    format!("{}_tag_discovered", DOMAIN)
}

/// Fired when the access point goes online or offline.
pub fn connection_status_topic() -> String {
    format!("{}_connection_status", DOMAIN)
}

/// Fired whenever the blacklist changes.
pub fn blacklist_update_topic() -> String {
    format!("{}_blacklist_update", DOMAIN)
}

/// Fired when a new image has been written for `tag_mac`.
pub fn image_update_topic(tag_mac: &str) -> String {
    format!("{}_{}", SIGNAL_TAG_IMAGE_UPDATE, tag_mac)
}

/// OpenEPaperLink integration for epaperd
///
/// Owns the hub connection and the image platform set up on it.
pub struct OpenEPaperLinkIntegration {
    hub: Arc<dyn Hub>,
    image_dir: PathBuf,
    platform: Option<ImagePlatformHandle>,
}

impl OpenEPaperLinkIntegration {
    pub fn new(hub: Arc<dyn Hub>, image_dir: PathBuf) -> Self {
        Self {
            hub,
            image_dir,
            platform: None,
        }
    }
}

#[async_trait]
impl engine::Integration for OpenEPaperLinkIntegration {
    fn name(&self) -> &str {
        DOMAIN
    }

    async fn setup(&mut self, ctx: engine::SetupContext) -> Result<(), Box<dyn Error + Send>> {
        info!(
            "Setting up OpenEPaperLink with {} known tag(s), images in {}",
            self.hub.tags().len(),
            self.image_dir.display()
        );

        self.platform = Some(setup_entry(
            self.hub.clone(),
            self.image_dir.clone(),
            &ctx.dispatcher,
            ctx.entities,
        ));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        if self.platform.take().is_some() {
            info!("OpenEPaperLink stopped discovering tags");
        }
        Ok(())
    }
}

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_open_epaper_link(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let oepl_config = if let Some(c) = &ctx.config.integrations.open_epaper_link {
        c
    } else {
        return Ok(None);
    };

    let hub = MemoryHub::from_config(oepl_config, ctx.dispatcher.clone());
    Ok(Some(Box::new(OpenEPaperLinkIntegration::new(
        Arc::new(hub),
        oepl_config.image_dir.clone(),
    ))))
}
