//! Session manager for tracking all connected clients

use super::connection::SessionHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// A client that announced itself with `join`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Presence {
    pub user_id: String,
    pub path: String,
    pub joined_at: DateTime<Utc>,
}

/// Manages all active sessions
pub struct SessionManager {
    /// Map of session_id -> session entry
    sessions: Arc<RwLock<HashMap<u64, SessionEntry>>>,
    next_id: AtomicU64,
}

struct SessionEntry {
    handle: SessionHandle,
    presence: Option<Presence>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a new session
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a new session
    pub async fn register(&self, handle: SessionHandle) {
        let entry = SessionEntry {
            handle,
            presence: None,
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(entry.handle.id, entry);
    }

    /// Unregister a session, returning its presence if it had joined
    pub async fn unregister(&self, session_id: u64) -> Option<Presence> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&session_id).and_then(|entry| entry.presence)
    }

    /// Record who is behind a session; replaces an earlier join
    pub async fn set_presence(&self, session_id: u64, presence: Presence) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(entry) => {
                entry.presence = Some(presence);
                true
            }
            None => false,
        }
    }

    /// Forget who is behind a session
    pub async fn clear_presence(&self, session_id: u64) -> Option<Presence> {
        let mut sessions = self.sessions.write().await;
        sessions
            .get_mut(&session_id)
            .and_then(|entry| entry.presence.take())
    }

    /// Send a frame to a specific session
    pub async fn send_to(&self, session_id: u64, frame: &str) -> anyhow::Result<()> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&session_id)
            .ok_or_else(|| anyhow::anyhow!("Session not connected: {}", session_id))?;
        entry.handle.send(frame)
    }

    /// Broadcast a frame to every session except the originator
    pub async fn broadcast_except(&self, origin: u64, frame: &str) -> usize {
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for (session_id, entry) in sessions.iter() {
            if *session_id == origin {
                continue;
            }
            match entry.handle.send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(session_id, error = %e, "Failed to relay frame"),
            }
        }
        delivered
    }

    /// Everyone who has joined, oldest first
    pub async fn presence(&self) -> Vec<Presence> {
        let sessions = self.sessions.read().await;
        let mut present: Vec<Presence> = sessions
            .values()
            .filter_map(|entry| entry.presence.clone())
            .collect();
        present.sort_by_key(|p| p.joined_at);
        present
    }

    /// Get the number of connected sessions
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
