//! WebSocket transport implementation

use crate::transport::traits::{TransportConnector, TransportLink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

/// Connects to a `ws://` or `wss://` endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<TransportLink> {
        let (socket, response) = connect_async(url.as_str())
            .await
            .with_context(|| format!("WebSocket handshake with {} failed", url))?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (writer, reader) = socket.split();

        let sink = writer.with(|frame: String| {
            future::ready(Ok::<Message, anyhow::Error>(Message::Text(frame)))
        });

        let stream = reader.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                // Not part of the protocol; let the codec reject it if it is not JSON
                Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                // Ping/pong are answered by tungstenite; close ends the stream
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            })
        });

        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }

    fn name(&self) -> &'static str {
        "WebSocket"
    }
}
