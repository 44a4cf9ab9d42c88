pub mod endpoint;
pub mod traits;
pub mod websocket;

pub use endpoint::{live_url, snapshot_url};
pub use traits::{FrameSink, FrameStream, TransportConnector, TransportLink};
pub use websocket::WebSocketConnector;
