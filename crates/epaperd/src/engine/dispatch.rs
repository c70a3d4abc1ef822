//! In-process signal bus.
//!
//! Integrations and entities talk to each other through named topics. A
//! listener is registered with [`Dispatcher::connect`] and stays registered for
//! as long as the returned [`Subscription`] is alive.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::trace;

/// A message delivered to every listener of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub topic: String,
    pub args: Vec<String>,
}

impl Signal {
    /// Positional argument `idx`, if the sender supplied one.
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }
}

type Callback = Arc<dyn Fn(&Signal) + Send + Sync>;

struct Listener {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    topics: HashMap<String, Vec<Listener>>,
}

/// Topic-based publish/subscribe registry.
///
/// Cloning is cheap; all clones share the same listener table.
#[derive(Clone, Default)]
pub struct Dispatcher {
    table: Arc<Mutex<Table>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Dispatcher")
            .field("topics", &table.topics.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `topic`.
    ///
    /// Dropping the returned [`Subscription`] unregisters the callback.
    pub fn connect<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let active = Arc::new(AtomicBool::new(true));

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let id = table.next_id;
        table.next_id += 1;
        table.topics.entry(topic.clone()).or_default().push(Listener {
            id,
            active: active.clone(),
            callback: Arc::new(callback),
        });
        trace!("Connected listener {} to {}", id, topic);

        Subscription {
            table: Arc::downgrade(&self.table),
            topic,
            id,
            active,
        }
    }

    /// Deliver a signal to every listener currently connected to `topic`.
    ///
    /// Callbacks run on the caller's task, after the table lock has been
    /// released, so a callback may itself connect, disconnect or send.
    pub fn send(&self, topic: &str, args: Vec<String>) {
        let listeners: Vec<(Arc<AtomicBool>, Callback)> = {
            let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            match table.topics.get(topic) {
                Some(listeners) => listeners
                    .iter()
                    .map(|l| (l.active.clone(), l.callback.clone()))
                    .collect(),
                None => return,
            }
        };

        let signal = Signal {
            topic: topic.to_string(),
            args,
        };
        trace!("Dispatching {} to {} listener(s)", topic, listeners.len());

        for (active, callback) in listeners {
            // A listener dropped by an earlier callback in this same send must not fire.
            if active.load(Ordering::Acquire) {
                callback(&signal);
            }
        }
    }

    /// Number of listeners connected to `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.topics.get(topic).map_or(0, Vec::len)
    }
}

/// Handle for a connected listener. Disconnects on drop.
#[must_use = "dropping a Subscription disconnects the listener"]
pub struct Subscription {
    table: Weak<Mutex<Table>>,
    topic: String,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Disconnect now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);

        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listeners) = table.topics.get_mut(&self.topic) {
            listeners.retain(|l| l.id != self.id);
            if listeners.is_empty() {
                table.topics.remove(&self.topic);
            }
        }
        trace!("Disconnected listener {} from {}", self.id, self.topic);
    }
}
