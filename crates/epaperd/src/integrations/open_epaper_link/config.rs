use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_online() -> bool {
    true
}

/// Configuration for the OpenEPaperLink integration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding the rendered tag images (default: "images")
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,

    /// Whether the access point is reachable at startup (default: true)
    #[serde(default = "default_online")]
    pub online: bool,

    /// Tags that must not get entities
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Tags known to the hub at startup, keyed by MAC
    #[serde(default)]
    pub tags: BTreeMap<String, TagConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            online: default_online(),
            blacklist: Vec::new(),
            tags: BTreeMap::new(),
        }
    }
}

/// A single tag as declared in the config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagConfig {
    /// Human-readable tag name
    pub name: Option<String>,

    /// Hardware type code reported by the tag
    #[serde(default)]
    pub hw_type: u8,
}
