//! Publish/subscribe bus for live-connection events
//!
//! Subscribers register per [`Category`]. Every inbound message additionally
//! produces one type-tagged notification, so listeners can follow message
//! types the client does not route.

use livelink_shared::{Category, InboundMessage};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::error;

/// Events delivered to category subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Live transport is up and the handshake was sent
    Connected,
    /// Live transport went down or an attempt failed
    Disconnected { reason: String },
    /// A reconnect timer was armed
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Retries exhausted; snapshot polling started
    FallbackActivated,
    /// One key of a polled snapshot
    FallbackData { key: String, value: Value },
    /// A routed inbound message
    Message(InboundMessage),
}

impl Event {
    /// The category this event is delivered under
    pub fn category(&self) -> Option<Category> {
        match self {
            Event::Connected => Some(Category::Connected),
            Event::Disconnected { .. } => Some(Category::Disconnected),
            Event::ReconnectScheduled { .. } => Some(Category::ReconnectScheduled),
            Event::FallbackActivated => Some(Category::FallbackActivated),
            Event::FallbackData { .. } => Some(Category::FallbackData),
            Event::Message(message) => message.category(),
        }
    }
}

/// Category subscriber
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Receives `(type, fields)` for every inbound message
pub type TaggedCallback = Arc<dyn Fn(&str, &Map<String, Value>) + Send + Sync>;

/// Identifies one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Id handed out when nothing was registered (disabled manager)
    pub const DETACHED: SubscriptionId = SubscriptionId(0);
}

/// Routes events to subscribers in registration order
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<Category, Vec<(SubscriptionId, Callback)>>>,
    tagged: RwLock<Vec<(SubscriptionId, TaggedCallback)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            tagged: RwLock::new(Vec::new()),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a callback for one category
    pub fn subscribe<F>(&self, category: Category, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_shared(category, Arc::new(callback))
    }

    /// Register an already shared callback (one handler, several categories)
    pub fn subscribe_shared(&self, category: Category, callback: Callback) -> SubscriptionId {
        let id = self.next_id();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(category)
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a registration; only matches within the given category
    pub fn unsubscribe(&self, category: Category, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        match subscribers.get_mut(&category) {
            Some(list) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                list.len() != before
            }
            None => false,
        }
    }

    /// Register a listener for the generic per-message notification
    pub fn subscribe_tagged<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &Map<String, Value>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.tagged
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe_tagged(&self, id: SubscriptionId) -> bool {
        let mut tagged = self.tagged.write().unwrap_or_else(PoisonError::into_inner);
        let before = tagged.len();
        tagged.retain(|(existing, _)| *existing != id);
        tagged.len() != before
    }

    pub fn subscriber_count(&self, category: Category) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .map_or(0, Vec::len)
    }

    /// Deliver an event to its category; returns how many callbacks ran
    pub fn publish(&self, event: &Event) -> usize {
        let Some(category) = event.category() else {
            return 0;
        };

        // Snapshot so callbacks may (un)subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in &callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(?category, "Subscriber panicked while handling event");
            }
        }

        callbacks.len()
    }

    /// Deliver the generic type-tagged notification
    pub fn publish_tagged(&self, kind: &str, fields: &Map<String, Value>) -> usize {
        let callbacks: Vec<TaggedCallback> = self
            .tagged
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in &callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(kind, fields))).is_err() {
                error!(kind, "Tagged listener panicked");
            }
        }

        callbacks.len()
    }

    /// Route a decoded inbound message: its category first, then exactly one
    /// tagged notification
    pub fn dispatch_inbound(&self, message: InboundMessage) {
        let kind = message.kind().to_string();
        let fields = message.fields().clone();

        if message.category().is_some() {
            self.publish(&Event::Message(message));
        }
        self.publish_tagged(&kind, &fields);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Callback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |name: &str| -> Callback {
            let log = log_clone.clone();
            let name = name.to_string();
            Arc::new(move |_event: &Event| log.lock().unwrap().push(name.clone()))
        };
        (log, make)
    }

    fn message(kind: &str) -> InboundMessage {
        match json!({"id": 1}) {
            Value::Object(fields) => InboundMessage::from_parts(kind.into(), fields),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe_shared(Category::Connected, make("first"));
        bus.subscribe_shared(Category::Connected, make("second"));
        bus.subscribe_shared(Category::Connected, make("third"));

        assert_eq!(bus.publish(&Event::Connected), 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_is_scoped_to_category() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let handler = make("shared");

        let on_connected = bus.subscribe_shared(Category::Connected, handler.clone());
        let on_disconnected = bus.subscribe_shared(Category::Disconnected, handler.clone());

        // Wrong category pairing removes nothing
        assert!(!bus.unsubscribe(Category::Disconnected, on_connected));
        assert!(bus.unsubscribe(Category::Connected, on_connected));
        assert!(!bus.unsubscribe(Category::Connected, on_connected));

        bus.publish(&Event::Connected);
        assert!(log.lock().unwrap().is_empty());

        bus.publish(&Event::Disconnected { reason: "gone".into() });
        assert_eq!(log.lock().unwrap().len(), 1);

        assert!(bus.unsubscribe(Category::Disconnected, on_disconnected));
        bus.publish(&Event::Disconnected { reason: "gone".into() });
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicU64::new(0));
        let own_id = Arc::new(Mutex::new(None::<SubscriptionId>));

        let bus_clone = bus.clone();
        let calls_clone = calls.clone();
        let own_id_clone = own_id.clone();
        let id = bus.subscribe(Category::DataUpdate, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *own_id_clone.lock().unwrap() {
                bus_clone.unsubscribe(Category::DataUpdate, id);
            }
        });
        *own_id.lock().unwrap() = Some(id);

        let (log, make) = recorder();
        bus.subscribe_shared(Category::DataUpdate, make("after"));

        bus.publish(&Event::Message(message("data_update")));
        bus.publish(&Event::Message(message("data_update")));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(bus.subscriber_count(Category::DataUpdate), 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_others() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(Category::Notification, |_| panic!("subscriber bug"));
        bus.subscribe_shared(Category::Notification, make("survivor"));

        assert_eq!(bus.publish(&Event::Message(message("notification"))), 2);
        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    }

    #[test]
    fn test_unrecognized_message_only_reaches_tagged_listeners() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        for category in Category::ALL {
            bus.subscribe_shared(category, make("category"));
        }

        let tags = Arc::new(Mutex::new(Vec::new()));
        let tags_clone = tags.clone();
        bus.subscribe_tagged(move |kind, fields| {
            tags_clone.lock().unwrap().push((kind.to_string(), fields["id"].clone()));
        });

        bus.dispatch_inbound(message("user_joined"));

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(*tags.lock().unwrap(), vec![("user_joined".to_string(), json!(1))]);
    }

    #[test]
    fn test_routed_message_reaches_category_and_tagged() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe_shared(Category::CacheInvalidate, make("cache"));
        bus.subscribe_shared(Category::DataUpdate, make("data"));

        let tagged = Arc::new(AtomicU64::new(0));
        let tagged_clone = tagged.clone();
        let tag_id = bus.subscribe_tagged(move |_, _| {
            tagged_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch_inbound(message("cache_invalidate"));
        assert_eq!(*log.lock().unwrap(), vec!["cache"]);
        assert_eq!(tagged.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe_tagged(tag_id));
        bus.dispatch_inbound(message("cache_invalidate"));
        assert_eq!(tagged.load(Ordering::SeqCst), 1);
    }
}
