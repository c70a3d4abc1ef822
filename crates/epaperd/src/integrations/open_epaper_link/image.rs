//! Image platform: one image entity per e-paper tag.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::AP_MAC;
use super::DOMAIN;
use super::MANUFACTURER;
use super::blacklist_update_topic;
use super::connection_status_topic;
use super::hub::Hub;
use super::image_update_topic;
use super::tag_discovered_topic;
use super::tag_types::hw_string;
use super::util::image_path;
use crate::engine::DeviceInfo;
use crate::engine::Dispatcher;
use crate::engine::Entity;
use crate::engine::EntityContext;
use crate::engine::EntitySink;
use crate::engine::StateWriter;
use crate::engine::Subscription;

const PLATFORM: &str = "image";

/// How many `_<n>` suffixes to try before giving up on a tag whose entity id
/// keeps colliding.
const MAX_ENTITY_ID_ATTEMPTS: u32 = 16;

/// `image.<mac>_content`, with `_<attempt>` appended after the first attempt.
fn entity_id_for(tag_mac: &str, attempt: u32) -> String {
    let base = format!("{}.{}_content", PLATFORM, tag_mac.to_lowercase());
    match attempt {
        1 => base,
        n => format!("{}_{}", base, n),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("image read task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Read a whole image file on the blocking pool.
async fn read_image(path: PathBuf) -> Result<Vec<u8>, ImageError> {
    tokio::task::spawn_blocking(move || {
        std::fs::read(&path).map_err(|source| ImageError::Io { path, source })
    })
    .await?
}

/// State shared between an entity and its signal callbacks.
struct Shared {
    hub: Arc<dyn Hub>,
    tag_mac: String,
    entity_id: String,
    /// Bumped on every image-updated signal so consumers can tell a new image apart.
    image_revision: AtomicU64,
    /// Present only while attached to the engine.
    writer: Mutex<Option<StateWriter>>,
}

impl Shared {
    fn available(&self) -> bool {
        self.hub.online()
            && self.hub.has_tag(&self.tag_mac)
            && !self.hub.blacklisted_tags().contains(&self.tag_mac)
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({
            "tag_mac": self.tag_mac,
            "image_revision": self.image_revision.load(Ordering::Acquire),
        })
    }

    /// Publish current state. No-op once detached.
    fn write_state(&self) {
        // Held for the whole write so a concurrent detach cannot slip in between.
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = writer.as_ref() {
            writer.write(&self.entity_id, self.available(), self.state_json());
        }
    }

    fn handle_image_update(&self) {
        self.image_revision.fetch_add(1, Ordering::AcqRel);
        debug!("New image for {}", self.entity_id);
        self.write_state();
    }

    /// A blacklisted tag only becomes unavailable. Removal of long-unavailable
    /// entities is the engine's call, not ours.
    fn handle_blacklist_update(&self) {
        if self.hub.blacklisted_tags().contains(&self.tag_mac) {
            debug!("Tag {} is blacklisted, {} is unavailable", self.tag_mac, self.entity_id);
        }
        self.write_state();
    }
}

/// Image entity showing the content currently rendered for one tag.
pub struct OpenEPaperLinkImage {
    shared: Arc<Shared>,
    unique_id: String,
    device_info: DeviceInfo,
    image_dir: PathBuf,
    /// Resolved on first image request, then fixed for the entity's lifetime.
    image_path: OnceLock<PathBuf>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl OpenEPaperLinkImage {
    pub fn new(hub: Arc<dyn Hub>, tag_mac: &str, image_dir: PathBuf) -> Self {
        Self::with_entity_id(hub, tag_mac, image_dir, entity_id_for(tag_mac, 1))
    }

    fn with_entity_id(
        hub: Arc<dyn Hub>,
        tag_mac: &str,
        image_dir: PathBuf,
        entity_id: String,
    ) -> Self {
        let tag_data = hub.tag_data(tag_mac).unwrap_or_default();
        let name = tag_data.tag_name.unwrap_or_else(|| tag_mac.to_string());

        let device_info = DeviceInfo::new((DOMAIN.to_string(), tag_mac.to_string()), name)
            .with_manufacturer(MANUFACTURER)
            .with_model(hw_string(tag_data.hw_type))
            .with_via_device(DOMAIN, AP_MAC);

        Self {
            shared: Arc::new(Shared {
                hub,
                tag_mac: tag_mac.to_string(),
                entity_id,
                image_revision: AtomicU64::new(0),
                writer: Mutex::new(None),
            }),
            unique_id: format!("{}_content", tag_mac),
            device_info,
            image_dir,
            image_path: OnceLock::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Entity for OpenEPaperLinkImage {
    fn entity_id(&self) -> &str {
        &self.shared.entity_id
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn name(&self) -> Option<&str> {
        Some("Content")
    }

    fn icon(&self) -> Option<&str> {
        Some("mdi:image")
    }

    fn device_info(&self) -> Option<&DeviceInfo> {
        Some(&self.device_info)
    }

    fn available(&self) -> bool {
        self.shared.available()
    }

    fn state_json(&self) -> serde_json::Value {
        self.shared.state_json()
    }

    fn added_to_engine(&self, ctx: EntityContext) {
        *self
            .shared
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ctx.writer);

        let shared = self.shared.clone();
        let image = ctx
            .dispatcher
            .connect(image_update_topic(&self.shared.tag_mac), move |_| {
                shared.handle_image_update()
            });

        let shared = self.shared.clone();
        let connection = ctx
            .dispatcher
            .connect(connection_status_topic(), move |_| shared.write_state());

        let shared = self.shared.clone();
        let blacklist = ctx
            .dispatcher
            .connect(blacklist_update_topic(), move |_| {
                shared.handle_blacklist_update()
            });

        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([image, connection, blacklist]);

        self.shared.write_state();
    }

    fn will_remove_from_engine(&self) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.shared
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn image(&self) -> Option<Vec<u8>> {
        let path = self
            .image_path
            .get_or_init(|| {
                image_path(
                    &self.image_dir,
                    &format!("{}.{}", DOMAIN, self.shared.tag_mac),
                )
            })
            .clone();

        if !path.exists() {
            return None;
        }

        match read_image(path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(
                    "Could not read image file for {}: {}",
                    self.shared.entity_id, e
                );
                None
            }
        }
    }
}

/// Creates image entities for the hub's tags, at most one per tag.
pub struct ImagePlatform {
    hub: Arc<dyn Hub>,
    image_dir: PathBuf,
    entities: Arc<dyn EntitySink>,
    /// Tags that already have an entity from this setup
    added: Mutex<HashSet<String>>,
}

impl ImagePlatform {
    /// Create an entity for `tag_mac` unless it is the AP, blacklisted, or
    /// already has one.
    pub fn add_tag(&self, tag_mac: &str) {
        if tag_mac == AP_MAC || self.hub.blacklisted_tags().contains(tag_mac) {
            debug!("Not creating an image entity for {}", tag_mac);
            return;
        }

        // Claimed up front so a discovery racing this one backs off.
        if !self
            .added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag_mac.to_string())
        {
            return;
        }

        // Ids are lowercased, so MACs differing only in case need a suffix.
        for attempt in 1..=MAX_ENTITY_ID_ATTEMPTS {
            let entity_id = entity_id_for(tag_mac, attempt);
            let entity = OpenEPaperLinkImage::with_entity_id(
                self.hub.clone(),
                tag_mac,
                self.image_dir.clone(),
                entity_id.clone(),
            );
            if self
                .entities
                .add_entities(vec![Arc::new(entity)])
                .contains(&entity_id)
            {
                return;
            }
            debug!("Entity id {} is taken, trying the next one", entity_id);
        }

        warn!("No free entity id for tag {}, not creating its image entity", tag_mac);
        self.added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag_mac);
    }

    /// Tags this platform has created entities for.
    pub fn tracked_tags(&self) -> HashSet<String> {
        self.added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A set-up image platform. Dropping it stops discovery of new tags.
pub struct ImagePlatformHandle {
    platform: Arc<ImagePlatform>,
    _discovery: Subscription,
}

impl ImagePlatformHandle {
    pub fn platform(&self) -> &ImagePlatform {
        &self.platform
    }
}

/// Set up the image platform.
///
/// Adds an entity for every eligible tag the hub already knows, then keeps
/// adding entities for tags announced on the discovery signal.
pub fn setup_entry(
    hub: Arc<dyn Hub>,
    image_dir: PathBuf,
    dispatcher: &Dispatcher,
    entities: Arc<dyn EntitySink>,
) -> ImagePlatformHandle {
    let platform = Arc::new(ImagePlatform {
        hub,
        image_dir,
        entities,
        added: Mutex::new(HashSet::new()),
    });

    for tag_mac in platform.hub.tags() {
        platform.add_tag(&tag_mac);
    }

    let p = platform.clone();
    let discovery = dispatcher.connect(tag_discovered_topic(), move |signal| {
        match signal.arg(0) {
            Some(tag_mac) => p.add_tag(tag_mac),
            None => warn!("Ignoring tag discovery signal without a tag MAC"),
        }
    });

    ImagePlatformHandle {
        platform,
        _discovery: discovery,
    }
}
