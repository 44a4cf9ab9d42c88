//! Event dispatch for live-connection subscribers
//!
//! This module handles:
//! - Category subscriptions with removal by id
//! - Generic type-tagged notifications for every inbound message
//! - Lifecycle events (connected, disconnected, retry, fallback)

mod bus;

pub use bus::{Callback, Event, EventBus, SubscriptionId, TaggedCallback};
