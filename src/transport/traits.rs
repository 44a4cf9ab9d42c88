//! Transport trait abstraction for pluggable live-connection backends

use anyhow::Result;
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;
use url::Url;

/// Outbound half of a live transport; accepts encoded text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;

/// Inbound half of a live transport; yields text frames until the peer closes
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An established bidirectional transport, split into its two halves
pub struct TransportLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Attempt to connect, returning a link on success
    async fn connect(&self, url: &Url) -> Result<TransportLink>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
