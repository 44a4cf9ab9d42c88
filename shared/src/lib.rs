//! livelink Shared Protocol Types
//!
//! This crate provides the message model, JSON codec and connection state
//! machine shared by the live-connection client and the development server.

pub mod backoff;
pub mod codec;
pub mod message;
pub mod state_machine;

// Re-export commonly used types at crate root
pub use backoff::ReconnectPolicy;
pub use message::{types, Category, Identity, InboundMessage, OutboundMessage};
pub use state_machine::{ConnectionState, ConnectionStateMachine, LinkEvent, TransitionResult};

/// Protocol parameters for the live connection
pub mod lifecycle {
    /// Path of the live transport endpoint on the hosting origin
    pub const LIVE_PATH: &str = "/ws/live/";

    /// Path of the snapshot resource polled in fallback mode
    pub const SNAPSHOT_PATH: &str = "/api/live/snapshot/";

    /// Initial reconnect delay in milliseconds
    pub const RECONNECT_BASE_DELAY_MS: u64 = 2000;

    /// Consecutive reconnect attempts before switching to snapshot polling
    pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

    /// Upper bound on a single connection attempt
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Snapshot polling interval once the live connection is given up
    pub const POLL_INTERVAL_MS: u64 = 30_000;

    /// Per-request timeout for snapshot polling
    pub const POLL_REQUEST_TIMEOUT_MS: u64 = 10_000;
}
