//! Session management for connected live clients
//!
//! This module handles:
//! - Tracking every open WebSocket session
//! - Presence bookkeeping from join/leave
//! - Relaying updates to every other session

mod connection;
mod manager;

pub use connection::{handle_socket, route_frame, SessionHandle};
pub use manager::{Presence, SessionManager};
