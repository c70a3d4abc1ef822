use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::PoisonError;
use std::sync::RwLock;

use tracing::debug;
use tracing::info;

use super::OpenEPaperLinkConfig;
use super::blacklist_update_topic;
use super::connection_status_topic;
use super::image_update_topic;
use super::tag_discovered_topic;
use crate::engine::Dispatcher;

/// What the hub knows about a single tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagData {
    pub hw_type: u8,
    pub tag_name: Option<String>,
}

/// Read side of the access point connection, as the image platform sees it.
pub trait Hub: Send + Sync {
    /// Whether the access point is currently reachable
    fn online(&self) -> bool;

    /// MACs of every tag the hub knows about
    fn tags(&self) -> Vec<String>;

    fn has_tag(&self, tag_mac: &str) -> bool {
        self.tags().iter().any(|t| t == tag_mac)
    }

    fn blacklisted_tags(&self) -> HashSet<String>;

    fn tag_data(&self, tag_mac: &str) -> Option<TagData>;
}

#[derive(Debug, Default)]
struct HubState {
    online: bool,
    tags: BTreeMap<String, TagData>,
    blacklist: HashSet<String>,
}

/// Hub whose state lives in memory and is changed through method calls.
///
/// Every mutation publishes the same signal a polling hub would, so the image
/// platform reacts to it exactly as it would to the real thing. The state lock
/// is always released before a signal goes out; listeners read the hub back.
#[derive(Debug)]
pub struct MemoryHub {
    state: RwLock<HubState>,
    dispatcher: Dispatcher,
}

impl MemoryHub {
    /// An offline hub with no tags.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            dispatcher,
        }
    }

    /// Seed the hub from configuration. No signals are sent.
    pub fn from_config(config: &OpenEPaperLinkConfig, dispatcher: Dispatcher) -> Self {
        let tags = config
            .tags
            .iter()
            .map(|(mac, tag)| {
                (
                    mac.clone(),
                    TagData {
                        hw_type: tag.hw_type,
                        tag_name: tag.name.clone(),
                    },
                )
            })
            .collect();

        Self {
            state: RwLock::new(HubState {
                online: config.online,
                tags,
                blacklist: config.blacklist.iter().cloned().collect(),
            }),
            dispatcher,
        }
    }

    pub fn set_online(&self, online: bool) {
        let changed = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut state.online, online) != online
        };

        if changed {
            info!(
                "Access point is now {}",
                if online { "online" } else { "offline" }
            );
            self.dispatcher.send(&connection_status_topic(), vec![]);
        }
    }

    /// Insert or update a tag. A tag seen for the first time is announced.
    pub fn upsert_tag(&self, tag_mac: &str, data: TagData) {
        let is_new = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.tags.insert(tag_mac.to_string(), data).is_none()
        };

        if is_new {
            info!("Discovered tag {}", tag_mac);
            self.dispatcher
                .send(&tag_discovered_topic(), vec![tag_mac.to_string()]);
        }
    }

    /// Forget a tag. Its entity stays registered and reports unavailable on
    /// its next state write.
    pub fn remove_tag(&self, tag_mac: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.tags.remove(tag_mac).is_some()
    }

    /// Replace the blacklist and announce the change.
    pub fn set_blacklist<I>(&self, tags: I)
    where
        I: IntoIterator<Item = String>,
    {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.blacklist = tags.into_iter().collect();
            debug!("Blacklist now holds {} tag(s)", state.blacklist.len());
        }
        self.dispatcher.send(&blacklist_update_topic(), vec![]);
    }

    /// Announce that a new image has been written for `tag_mac`.
    pub fn image_updated(&self, tag_mac: &str) {
        debug!("Image updated for tag {}", tag_mac);
        self.dispatcher.send(&image_update_topic(tag_mac), vec![]);
    }
}

impl Hub for MemoryHub {
    fn online(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .online
    }

    fn tags(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.tags.keys().cloned().collect()
    }

    fn has_tag(&self, tag_mac: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.tags.contains_key(tag_mac)
    }

    fn blacklisted_tags(&self) -> HashSet<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.blacklist.clone()
    }

    fn tag_data(&self, tag_mac: &str) -> Option<TagData> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.tags.get(tag_mac).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;
    use crate::engine::Signal;

    fn record(
        dispatcher: &Dispatcher,
        topic: String,
    ) -> (Arc<Mutex<Vec<Signal>>>, crate::engine::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub = dispatcher.connect(topic, move |signal: &Signal| {
            s.lock().unwrap().push(signal.clone());
        });
        (seen, sub)
    }

    #[test]
    fn test_from_config() {
        let config: OpenEPaperLinkConfig = toml::from_str(
            r#"
online = false
blacklist = ["B"]

[tags.A]
name = "Hallway"
hw_type = 1

[tags.B]
"#,
        )
        .unwrap();

        let hub = MemoryHub::from_config(&config, Dispatcher::new());

        assert!(!hub.online());
        assert_eq!(hub.tags(), vec!["A".to_string(), "B".to_string()]);
        assert!(hub.blacklisted_tags().contains("B"));
        assert_eq!(
            hub.tag_data("A"),
            Some(TagData {
                hw_type: 1,
                tag_name: Some("Hallway".to_string())
            })
        );
        assert_eq!(hub.tag_data("B").unwrap().tag_name, None);
    }

    #[test]
    fn test_upsert_announces_only_new_tags() {
        let dispatcher = Dispatcher::new();
        let hub = MemoryHub::new(dispatcher.clone());
        let (seen, _sub) = record(&dispatcher, tag_discovered_topic());

        hub.upsert_tag("A", TagData::default());
        hub.upsert_tag("A", TagData::default());
        hub.upsert_tag("B", TagData::default());

        let macs: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.arg(0).unwrap().to_string())
            .collect();
        assert_eq!(macs, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_set_online_signals_on_change_only() {
        let dispatcher = Dispatcher::new();
        let hub = MemoryHub::new(dispatcher.clone());
        let (seen, _sub) = record(&dispatcher, connection_status_topic());

        hub.set_online(true);
        hub.set_online(true);
        hub.set_online(false);

        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(!hub.online());
    }

    #[test]
    fn test_listener_can_read_hub_during_signal() {
        let dispatcher = Dispatcher::new();
        let hub = Arc::new(MemoryHub::new(dispatcher.clone()));
        let observed = Arc::new(Mutex::new(None));

        let h = hub.clone();
        let o = observed.clone();
        let _sub = dispatcher.connect(blacklist_update_topic(), move |_: &Signal| {
            *o.lock().unwrap() = Some(h.blacklisted_tags().len());
        });

        hub.set_blacklist(vec!["A".to_string(), "B".to_string()]);

        assert_eq!(*observed.lock().unwrap(), Some(2));
    }

    #[test]
    fn test_remove_tag() {
        let hub = MemoryHub::new(Dispatcher::new());
        hub.upsert_tag("A", TagData::default());

        assert!(hub.remove_tag("A"));
        assert!(!hub.remove_tag("A"));
        assert!(!hub.has_tag("A"));
    }
}
