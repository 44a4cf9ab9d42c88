//! Message model for the live connection
//!
//! Outbound messages are free-form JSON objects tagged with a `type`.
//! Inbound messages are decoded into a closed set of variants, with an
//! `Unrecognized` variant that keeps unknown types flowing to listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire `type` names
pub mod types {
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const CACHE_INVALIDATE: &str = "cache_invalidate";
    pub const DATA_UPDATE: &str = "data_update";
    pub const NOTIFICATION: &str = "notification";
    pub const ERROR: &str = "error";
    /// Presence notices broadcast by the server; not routed by category
    pub const USER_JOINED: &str = "user_joined";
    pub const USER_LEFT: &str = "user_left";
}

/// Who this client is and where it runs, announced on every connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub user_id: String,
    pub path: String,
    pub is_changelist: bool,
    pub permissions: Vec<String>,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            user_id: "anonymous".into(),
            path: "/".into(),
            is_changelist: false,
            permissions: Vec::new(),
        }
    }
}

/// A message composed by the application, stamped at capture time
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    kind: String,
    payload: Map<String, Value>,
    enqueued_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// Create an empty message of the given type
    pub fn new(kind: impl Into<String>) -> Self {
        Self::with_payload(kind, Map::new())
    }

    /// Create a message with a prepared payload object
    pub fn with_payload(kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    /// Add a payload field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Handshake announcing this client after every successful connect
    pub fn join(identity: &Identity) -> Self {
        Self::new(types::JOIN)
            .field("user_id", identity.user_id.clone())
            .field("path", identity.path.clone())
            .field("is_changelist", identity.is_changelist)
            .field("permissions", identity.permissions.clone())
    }

    /// Best-effort farewell sent before the client goes away
    pub fn leave(user_id: impl Into<String>) -> Self {
        Self::new(types::LEAVE).field("user_id", user_id.into())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

/// Subscription categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Transport reached Connected
    Connected,
    /// Transport left Connected (or a connect attempt failed)
    Disconnected,
    /// A reconnect timer was armed
    ReconnectScheduled,
    /// Reconnect attempts were exhausted and snapshot polling began
    FallbackActivated,
    /// One top-level key of a polled snapshot
    FallbackData,
    /// Server confirmed the connection
    ConnectionEstablished,
    /// Server asked clients to drop cached data
    CacheInvalidate,
    /// Domain data changed on the server
    DataUpdate,
    /// Human-facing notice from the server
    Notification,
    /// Server reported an error
    Error,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Connected,
        Category::Disconnected,
        Category::ReconnectScheduled,
        Category::FallbackActivated,
        Category::FallbackData,
        Category::ConnectionEstablished,
        Category::CacheInvalidate,
        Category::DataUpdate,
        Category::Notification,
        Category::Error,
    ];
}

/// A decoded inbound frame; the `type` field is carried by the variant
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    ConnectionEstablished(Map<String, Value>),
    CacheInvalidate(Map<String, Value>),
    DataUpdate(Map<String, Value>),
    Notification(Map<String, Value>),
    Error {
        message: String,
        fields: Map<String, Value>,
    },
    /// A type this client does not route; still delivered to tagged listeners
    Unrecognized {
        kind: String,
        fields: Map<String, Value>,
    },
}

impl InboundMessage {
    /// Build a message from its type tag and the remaining fields
    pub fn from_parts(kind: String, fields: Map<String, Value>) -> Self {
        match kind.as_str() {
            types::CONNECTION_ESTABLISHED => Self::ConnectionEstablished(fields),
            types::CACHE_INVALIDATE => Self::CacheInvalidate(fields),
            types::DATA_UPDATE => Self::DataUpdate(fields),
            types::NOTIFICATION => Self::Notification(fields),
            types::ERROR => {
                let message = fields
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified server error")
                    .to_string();
                Self::Error { message, fields }
            }
            _ => Self::Unrecognized { kind, fields },
        }
    }

    /// The wire `type` of this message
    pub fn kind(&self) -> &str {
        match self {
            Self::ConnectionEstablished(_) => types::CONNECTION_ESTABLISHED,
            Self::CacheInvalidate(_) => types::CACHE_INVALIDATE,
            Self::DataUpdate(_) => types::DATA_UPDATE,
            Self::Notification(_) => types::NOTIFICATION,
            Self::Error { .. } => types::ERROR,
            Self::Unrecognized { kind, .. } => kind,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        match self {
            Self::ConnectionEstablished(fields)
            | Self::CacheInvalidate(fields)
            | Self::DataUpdate(fields)
            | Self::Notification(fields)
            | Self::Error { fields, .. }
            | Self::Unrecognized { fields, .. } => fields,
        }
    }

    /// The category this message is routed to, if any
    pub fn category(&self) -> Option<Category> {
        match self {
            Self::ConnectionEstablished(_) => Some(Category::ConnectionEstablished),
            Self::CacheInvalidate(_) => Some(Category::CacheInvalidate),
            Self::DataUpdate(_) => Some(Category::DataUpdate),
            Self::Notification(_) => Some(Category::Notification),
            Self::Error { .. } => Some(Category::Error),
            Self::Unrecognized { .. } => None,
        }
    }
}
