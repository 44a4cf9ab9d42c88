//! Pull-based fallback for when the live connection is given up
//!
//! This module handles:
//! - Fetching the snapshot resource over HTTP
//! - Polling it on a fixed interval until cancelled

mod fallback;
mod source;

pub use fallback::PollingFallback;
pub use source::{HttpSnapshotSource, SnapshotSource};
