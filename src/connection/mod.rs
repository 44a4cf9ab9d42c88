//! Connection management for the single live link
//!
//! This module handles:
//! - Offline queueing of outbound messages, flushed in order on connect
//! - Exponential-backoff reconnection with a bounded attempt count
//! - Switching to snapshot polling once reconnects are exhausted
//! - Join/leave lifecycle messages

mod manager;
mod queue;
mod timer;

pub use manager::{ConnectionManager, SendOutcome};
pub use queue::OutboundQueue;
pub use timer::RetryTimer;
