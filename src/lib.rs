//! livelink: a managed live connection with offline queueing, reconnect
//! backoff and a snapshot-polling fallback

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod polling;
pub mod transport;

pub use config::{load_config, LiveConfig};
pub use connection::{ConnectionManager, SendOutcome};
pub use dispatch::{Event, EventBus, SubscriptionId};
pub use livelink_shared::{Category, ConnectionState, Identity, InboundMessage, OutboundMessage};
