//! Individual client session handling

use super::manager::{Presence, SessionManager};
use anyhow::{anyhow, Result};
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use livelink_shared::{codec, types, OutboundMessage};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handle to send frames to a specific session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: u64,
    sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
}

impl SessionHandle {
    pub fn new(id: u64, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Queue a frame for this session's writer
    pub fn send(&self, frame: &str) -> Result<()> {
        self.sender
            .send(frame.to_string())
            .map_err(|_| anyhow!("Session {} writer closed", self.id))
    }
}

/// Serve one WebSocket until it closes
pub async fn handle_socket(socket: WebSocket, sessions: Arc<SessionManager>) {
    let (mut writer, mut reader) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let handle = SessionHandle::new(sessions.next_session_id(), tx);
    let session_id = handle.id;
    sessions.register(handle).await;
    let connections = sessions.count().await;
    info!(session_id, connections, "Client connected");

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let established = OutboundMessage::new(types::CONNECTION_ESTABLISHED).field("session_id", session_id);
    if let Ok(frame) = codec::encode(&established) {
        let _ = sessions.send_to(session_id, &frame).await;
    }

    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => route_frame(&sessions, session_id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(session_id, error = %e, "Read error");
                break;
            }
        }
    }

    if let Some(presence) = sessions.unregister(session_id).await {
        announce_departure(&sessions, session_id, &presence).await;
    }
    writer_task.abort();
    info!(session_id, "Client disconnected");
}

/// Handle one inbound frame from a session
pub async fn route_frame(sessions: &SessionManager, session_id: u64, text: &str) {
    let (kind, fields) = match codec::split_frame(text) {
        Ok(parts) => parts,
        Err(e) => {
            warn!(session_id, error = %e, "Rejecting malformed frame");
            reply_error(sessions, session_id, &format!("malformed frame: {}", e)).await;
            return;
        }
    };
    debug!(session_id, kind = %kind, "Frame received");

    match kind.as_str() {
        types::JOIN => {
            let presence = Presence {
                user_id: string_field(&fields, "user_id").unwrap_or_else(|| "anonymous".into()),
                path: string_field(&fields, "path").unwrap_or_else(|| "/".into()),
                joined_at: Utc::now(),
            };
            info!(session_id, user_id = %presence.user_id, path = %presence.path, "Client joined");
            sessions.set_presence(session_id, presence.clone()).await;

            let notice = OutboundMessage::new(types::USER_JOINED)
                .field("user_id", presence.user_id)
                .field("path", presence.path);
            relay(sessions, session_id, &notice).await;
        }
        types::LEAVE => {
            if let Some(presence) = sessions.clear_presence(session_id).await {
                announce_departure(sessions, session_id, &presence).await;
            }
        }
        types::CACHE_INVALIDATE | types::DATA_UPDATE | types::NOTIFICATION => {
            let message = OutboundMessage::with_payload(kind.clone(), fields);
            relay(sessions, session_id, &message).await;
        }
        other => {
            reply_error(sessions, session_id, &format!("unsupported message type: {}", other)).await;
        }
    }
}

async fn announce_departure(sessions: &SessionManager, session_id: u64, presence: &Presence) {
    info!(session_id, user_id = %presence.user_id, "Client left");
    let notice = OutboundMessage::new(types::USER_LEFT).field("user_id", presence.user_id.clone());
    relay(sessions, session_id, &notice).await;
}

async fn relay(sessions: &SessionManager, origin: u64, message: &OutboundMessage) {
    match codec::encode(message) {
        Ok(frame) => {
            let delivered = sessions.broadcast_except(origin, &frame).await;
            debug!(kind = message.kind(), delivered, "Relayed");
        }
        Err(e) => warn!(kind = message.kind(), error = %e, "Cannot relay message"),
    }
}

async fn reply_error(sessions: &SessionManager, session_id: u64, detail: &str) {
    let message = OutboundMessage::new(types::ERROR).field("message", detail);
    if let Ok(frame) = codec::encode(&message) {
        let _ = sessions.send_to(session_id, &frame).await;
    }
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn connect(sessions: &SessionManager) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(sessions.next_session_id(), tx);
        let id = handle.id;
        sessions.register(handle).await;
        (id, rx)
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().expect("frame")).expect("json")
    }

    #[tokio::test]
    async fn test_join_and_leave_are_broadcast() {
        let sessions = SessionManager::new();
        let (alice, mut alice_rx) = connect(&sessions).await;
        let (_bob, mut bob_rx) = connect(&sessions).await;

        let join = json!({"type": "join", "user_id": "7", "path": "/bookings/"}).to_string();
        route_frame(&sessions, alice, &join).await;

        let joined = next(&mut bob_rx);
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["user_id"], "7");
        assert!(alice_rx.try_recv().is_err());
        assert_eq!(sessions.presence().await.len(), 1);

        route_frame(&sessions, alice, &json!({"type": "leave", "user_id": "7"}).to_string()).await;
        let left = next(&mut bob_rx);
        assert_eq!(left["type"], "user_left");
        assert!(sessions.presence().await.is_empty());
    }

    #[tokio::test]
    async fn test_updates_are_relayed_to_others() {
        let sessions = SessionManager::new();
        let (alice, mut alice_rx) = connect(&sessions).await;
        let (_bob, mut bob_rx) = connect(&sessions).await;

        let update = json!({"type": "data_update", "model": "booking", "id": 3}).to_string();
        route_frame(&sessions, alice, &update).await;

        let relayed = next(&mut bob_rx);
        assert_eq!(relayed["type"], "data_update");
        assert_eq!(relayed["id"], 3);
        assert!(relayed["timestamp"].is_string());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bad_frames_get_error_reply() {
        let sessions = SessionManager::new();
        let (alice, mut alice_rx) = connect(&sessions).await;
        let (_bob, mut bob_rx) = connect(&sessions).await;

        route_frame(&sessions, alice, "{oops").await;
        let reply = next(&mut alice_rx);
        assert_eq!(reply["type"], "error");
        assert!(reply["message"].as_str().unwrap().starts_with("malformed frame"));

        route_frame(&sessions, alice, &json!({"type": "teleport"}).to_string()).await;
        let reply = next(&mut alice_rx);
        assert_eq!(reply["message"], "unsupported message type: teleport");

        assert!(bob_rx.try_recv().is_err());
    }
}
