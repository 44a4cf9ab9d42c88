//! Connection manager with offline queueing, backoff reconnection and
//! snapshot-polling fallback
//!
//! A single actor task owns the transport, queue, timers and state machine.
//! [`ConnectionManager`] is a cheap cloneable handle that talks to it over a
//! channel; when every handle is dropped the actor shuts down.

use crate::config::LiveConfig;
use crate::connection::queue::OutboundQueue;
use crate::connection::timer::RetryTimer;
use crate::dispatch::{Callback, Event, EventBus, SubscriptionId};
use crate::polling::{HttpSnapshotSource, PollingFallback, SnapshotSource};
use crate::transport::{FrameSink, TransportConnector, TransportLink, WebSocketConnector};
use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use livelink_shared::{
    codec, Category, ConnectionState, ConnectionStateMachine, Identity, InboundMessage, LinkEvent,
    OutboundMessage, ReconnectPolicy, TransitionResult,
};
use livelink_shared::backoff::saturating_millis;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

/// What happened to a message handed to [`ConnectionManager::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the live transport
    Delivered,
    /// Held in the outbound queue until the next successful connect
    Queued,
    /// Dropped: manager disabled, shut down, or the message cannot be encoded
    Rejected,
}

impl SendOutcome {
    pub fn is_delivered(self) -> bool {
        self == SendOutcome::Delivered
    }
}

/// Requests from handles to the actor
enum Command {
    Connect,
    Reconnect,
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<SendOutcome>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Results of background work, tagged with the link generation they belong to
enum Signal {
    ConnectFinished {
        generation: u64,
        result: Result<TransportLink>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    LinkClosed {
        generation: u64,
        reason: String,
    },
    RetryDue {
        generation: u64,
    },
    Snapshot(Map<String, Value>),
}

#[derive(Clone)]
struct Running {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

/// Handle to the live connection
#[derive(Clone)]
pub struct ConnectionManager {
    /// `None` for a disabled manager
    inner: Option<Running>,
    bus: Arc<EventBus>,
}

impl ConnectionManager {
    /// Build a manager from configuration with the WebSocket transport and
    /// HTTP snapshot polling
    ///
    /// Must be called from within a Tokio runtime. The manager starts
    /// Disconnected; call [`connect`](Self::connect) to open the link.
    pub fn from_config(config: &LiveConfig) -> Result<Self> {
        if !config.should_run() {
            return Ok(Self::disabled());
        }
        let snapshots = HttpSnapshotSource::new(config.snapshot_url()?, config.request_timeout())?;
        Self::new(config, Arc::new(WebSocketConnector::new()), Arc::new(snapshots))
    }

    /// Build a manager with explicit transport and snapshot source
    pub fn new(
        config: &LiveConfig,
        connector: Arc<dyn TransportConnector>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Result<Self> {
        if !config.should_run() {
            info!(path = %config.identity.path, "Live connection disabled for this client");
            return Ok(Self::disabled());
        }

        config.validate()?;
        let url = config.live_url()?;
        let bus = Arc::new(EventBus::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        info!(
            url = %url,
            transport = connector.name(),
            max_attempts = config.reconnect.max_attempts,
            "Live connection manager created"
        );

        let actor = Actor {
            url,
            identity: config.identity.clone(),
            connector,
            snapshots,
            connect_timeout: config.connect_timeout(),
            poll_interval: config.poll_interval(),
            fsm: ConnectionStateMachine::new(),
            policy: ReconnectPolicy::new(config.base_delay(), config.reconnect.max_attempts),
            queue: OutboundQueue::new(config.queue.max_messages),
            timer: RetryTimer::new(),
            polling: None,
            sink: None,
            reader: None,
            generation: 0,
            bus: bus.clone(),
            signals: signal_tx,
            state: state_tx,
        };
        tokio::spawn(actor.run(command_rx, signal_rx));

        Ok(Self {
            inner: Some(Running {
                commands: command_tx,
                state: state_rx,
            }),
            bus,
        })
    }

    /// A manager on which every operation is a no-op
    pub fn disabled() -> Self {
        Self {
            inner: None,
            bus: Arc::new(EventBus::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Open the live link; a no-op while Connecting or Connected
    pub fn connect(&self) {
        self.command(Command::Connect, "connect");
    }

    /// Drop the current link, reset backoff and connect again
    ///
    /// This is also the only way out of snapshot-polling fallback.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect, "reconnect");
    }

    /// Say goodbye (if connected) and release the link without reconnecting
    pub async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.command(Command::Close { done }, "close") {
            let _ = closed.await;
        }
    }

    /// Deliver a message now, or queue it until the next connect
    pub async fn send(&self, message: OutboundMessage) -> SendOutcome {
        let Some(running) = &self.inner else {
            debug!(kind = message.kind(), "Live connection disabled; message dropped");
            return SendOutcome::Rejected;
        };

        let (reply, outcome) = oneshot::channel();
        if running.commands.send(Command::Send { message, reply }).is_err() {
            warn!("Live connection manager has shut down; message dropped");
            return SendOutcome::Rejected;
        }
        outcome.await.unwrap_or(SendOutcome::Rejected)
    }

    /// Subscribe to one category
    pub fn on<F>(&self, category: Category, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if !self.is_enabled() {
            debug!(?category, "Live connection disabled; subscription ignored");
            return SubscriptionId::DETACHED;
        }
        self.bus.subscribe(category, callback)
    }

    /// Subscribe a shared callback, so one handler can serve several categories
    pub fn on_shared(&self, category: Category, callback: Callback) -> SubscriptionId {
        if !self.is_enabled() {
            debug!(?category, "Live connection disabled; subscription ignored");
            return SubscriptionId::DETACHED;
        }
        self.bus.subscribe_shared(category, callback)
    }

    pub fn off(&self, category: Category, id: SubscriptionId) -> bool {
        if !self.is_enabled() {
            debug!(?category, "Live connection disabled; unsubscribe ignored");
            return false;
        }
        self.bus.unsubscribe(category, id)
    }

    /// Listen to the `(type, fields)` notification produced for every inbound message
    pub fn on_tagged<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &Map<String, Value>) + Send + Sync + 'static,
    {
        if !self.is_enabled() {
            debug!("Live connection disabled; tagged listener ignored");
            return SubscriptionId::DETACHED;
        }
        self.bus.subscribe_tagged(callback)
    }

    pub fn off_tagged(&self, id: SubscriptionId) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.bus.unsubscribe_tagged(id)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        match &self.inner {
            Some(running) => *running.state.borrow(),
            None => ConnectionState::Disconnected,
        }
    }

    /// The bus events are published on
    pub fn events(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    fn command(&self, command: Command, operation: &'static str) -> bool {
        match &self.inner {
            Some(running) => {
                if running.commands.send(command).is_err() {
                    warn!(operation, "Live connection manager has shut down");
                    return false;
                }
                true
            }
            None => {
                debug!(operation, "Live connection disabled; call ignored");
                false
            }
        }
    }
}

/// Sole owner of the connection state
struct Actor {
    url: Url,
    identity: Identity,
    connector: Arc<dyn TransportConnector>,
    snapshots: Arc<dyn SnapshotSource>,
    connect_timeout: Duration,
    poll_interval: Duration,
    fsm: ConnectionStateMachine,
    policy: ReconnectPolicy,
    queue: OutboundQueue,
    timer: RetryTimer,
    polling: Option<PollingFallback>,
    sink: Option<FrameSink>,
    reader: Option<JoinHandle<()>>,
    /// Bumped whenever a link attempt starts or a link is torn down
    generation: u64,
    bus: Arc<EventBus>,
    signals: mpsc::UnboundedSender<Signal>,
    state: watch::Sender<ConnectionState>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(signal) = signals.recv() => self.handle_signal(signal).await,
            }
        }
        self.shutdown();
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.handle_connect(),
            Command::Reconnect => self.handle_reconnect(),
            Command::Send { message, reply } => {
                let outcome = self.handle_send(message).await;
                let _ = reply.send(outcome);
            }
            Command::Close { done } => {
                self.handle_close().await;
                let _ = done.send(());
            }
        }
    }

    async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::ConnectFinished { generation, result } => {
                if generation != self.generation {
                    debug!(generation, "Discarding result of superseded connect attempt");
                    return;
                }
                match result {
                    Ok(link) => self.on_link_up(link).await,
                    Err(e) => self.on_connect_failed(e),
                }
            }
            Signal::Frame { generation, text } => {
                if generation == self.generation {
                    self.handle_frame(&text);
                }
            }
            Signal::LinkClosed { generation, reason } => {
                if generation == self.generation {
                    self.handle_link_lost(reason);
                }
            }
            Signal::RetryDue { generation } => {
                if generation != self.generation
                    || self.polling.is_some()
                    || self.fsm.state() != ConnectionState::Disconnected
                {
                    return;
                }
                info!(attempt = self.policy.attempt(), "Reconnect timer fired");
                if self.transition(LinkEvent::ConnectRequested).is_success() {
                    self.begin_connect();
                }
            }
            Signal::Snapshot(snapshot) => {
                if self.polling.is_none() {
                    return;
                }
                for (key, value) in snapshot {
                    self.bus.publish(&Event::FallbackData { key, value });
                }
            }
        }
    }

    fn handle_connect(&mut self) {
        if self.polling.is_some() {
            debug!("Snapshot polling active; connect ignored until reconnect()");
            return;
        }
        if self.transition(LinkEvent::ConnectRequested).is_success() {
            self.begin_connect();
        }
    }

    fn handle_reconnect(&mut self) {
        info!("Forced reconnect requested");
        self.timer.cancel();
        self.polling = None;
        let was_connected = self.fsm.is_connected();
        self.release_link();
        self.policy.reset();
        self.transition(LinkEvent::ResetRequested);
        if was_connected {
            self.bus.publish(&Event::Disconnected {
                reason: "reconnect requested".into(),
            });
        }
        if self.transition(LinkEvent::ConnectRequested).is_success() {
            self.begin_connect();
        }
    }

    async fn handle_send(&mut self, message: OutboundMessage) -> SendOutcome {
        let frame = match codec::encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Outbound message rejected");
                return SendOutcome::Rejected;
            }
        };

        if self.fsm.is_connected() {
            match self.write_frame(frame).await {
                Ok(()) => {
                    debug!(kind = message.kind(), "Message delivered");
                    return SendOutcome::Delivered;
                }
                Err(e) => {
                    warn!(kind = message.kind(), error = %e, "Write failed; queueing message");
                    let outcome = self.enqueue(message);
                    self.handle_link_lost(format!("write failed: {}", e));
                    return outcome;
                }
            }
        }

        self.enqueue(message)
    }

    fn enqueue(&mut self, message: OutboundMessage) -> SendOutcome {
        if self.queue.capacity() == Some(0) {
            warn!(kind = message.kind(), "Outbound queue disabled; message dropped");
            return SendOutcome::Rejected;
        }
        if let Some(evicted) = self.queue.push(message) {
            warn!(
                kind = evicted.kind(),
                dropped = self.queue.dropped(),
                "Outbound queue full; oldest message evicted"
            );
        }
        debug!(pending = self.queue.len(), "Message queued");
        SendOutcome::Queued
    }

    async fn handle_close(&mut self) {
        self.timer.cancel();
        self.polling = None;
        let was_connected = self.fsm.is_connected();

        if was_connected {
            let farewell = OutboundMessage::leave(self.identity.user_id.clone());
            match codec::encode(&farewell) {
                Ok(frame) => {
                    if let Err(e) = self.write_frame(frame).await {
                        debug!(error = %e, "Farewell not delivered");
                    }
                }
                Err(e) => debug!(error = %e, "Farewell not encodable"),
            }
            if let Some(sink) = self.sink.as_mut() {
                let _ = sink.close().await;
            }
        }

        self.release_link();
        self.policy.reset();
        let discarded = self.queue.clear();
        if discarded > 0 {
            info!(discarded, "Discarded queued messages on close");
        }
        self.transition(LinkEvent::CloseRequested);
        if was_connected {
            self.bus.publish(&Event::Disconnected {
                reason: "closed by client".into(),
            });
        }
    }

    fn begin_connect(&mut self) {
        self.timer.cancel();
        self.generation += 1;

        let connector = self.connector.clone();
        let url = self.url.clone();
        let limit = self.connect_timeout;
        let signals = self.signals.clone();
        let generation = self.generation;

        debug!(url = %url, generation, "Opening live transport");
        tokio::spawn(async move {
            let result = match timeout(limit, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "Connection attempt timed out after {}ms",
                    limit.as_millis()
                )),
            };
            let _ = signals.send(Signal::ConnectFinished { generation, result });
        });
    }

    async fn on_link_up(&mut self, link: TransportLink) {
        if !self.transition(LinkEvent::ConnectSucceeded).is_success() {
            return;
        }
        self.policy.reset();

        let TransportLink { sink, mut stream } = link;
        self.sink = Some(sink);

        let signals = self.signals.clone();
        let generation = self.generation;
        self.reader = Some(tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(text)) => {
                        if signals.send(Signal::Frame { generation, text }).is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => break format!("transport error: {}", e),
                    None => break "connection closed by peer".to_string(),
                }
            };
            let _ = signals.send(Signal::LinkClosed { generation, reason });
        }));

        match self.flush().await {
            Ok(flushed) if flushed > 0 => info!(flushed, "Flushed queued messages"),
            Ok(_) => {}
            Err(e) => {
                self.handle_link_lost(format!("flush failed: {}", e));
                return;
            }
        }

        let join = OutboundMessage::join(&self.identity);
        let sent = match codec::encode(&join) {
            Ok(frame) => self.write_frame(frame).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            self.handle_link_lost(format!("join failed: {}", e));
            return;
        }

        self.bus.publish(&Event::Connected);
    }

    /// Write queued messages in order; a failed write puts the message back
    /// at the head
    async fn flush(&mut self) -> Result<usize> {
        let mut flushed = 0;
        while let Some(message) = self.queue.pop_front() {
            let frame = match codec::encode(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(kind = message.kind(), error = %e, "Dropping unencodable queued message");
                    continue;
                }
            };
            if let Err(e) = self.write_frame(frame).await {
                self.queue.push_front(message);
                return Err(e);
            }
            flushed += 1;
        }
        Ok(flushed)
    }

    fn on_connect_failed(&mut self, error: anyhow::Error) {
        if !self.transition(LinkEvent::ConnectFailed).is_success() {
            return;
        }
        warn!(error = %error, attempt = self.policy.attempt(), "Connection attempt failed");
        self.bus.publish(&Event::Disconnected {
            reason: error.to_string(),
        });
        self.schedule_retry();
    }

    fn handle_frame(&mut self, text: &str) {
        match codec::decode(text) {
            Ok(message) => {
                if let InboundMessage::Error { message: detail, .. } = &message {
                    warn!(detail = %detail, "Server reported an error");
                }
                debug!(kind = message.kind(), "Inbound message");
                self.bus.dispatch_inbound(message);
            }
            Err(e) => warn!(error = %e, "Ignoring undecodable inbound frame"),
        }
    }

    fn handle_link_lost(&mut self, reason: String) {
        self.release_link();
        if !self.transition(LinkEvent::PeerClosed).is_success() {
            return;
        }
        warn!(reason = %reason, pending = self.queue.len(), "Live connection lost");
        self.bus.publish(&Event::Disconnected { reason });
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        match self.policy.next_delay() {
            Some(delay) => {
                let attempt = self.policy.attempt();
                let signals = self.signals.clone();
                let generation = self.generation;
                self.timer.arm(delay, move || {
                    let _ = signals.send(Signal::RetryDue { generation });
                });
                info!(
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = saturating_millis(delay),
                    "Reconnect scheduled"
                );
                self.bus.publish(&Event::ReconnectScheduled { attempt, delay });
            }
            None => self.activate_fallback(),
        }
    }

    fn activate_fallback(&mut self) {
        warn!(
            attempts = self.policy.attempt(),
            interval_ms = saturating_millis(self.poll_interval),
            "Reconnect attempts exhausted; falling back to snapshot polling"
        );
        let signals = self.signals.clone();
        self.polling = Some(PollingFallback::start(
            self.snapshots.clone(),
            self.poll_interval,
            move |snapshot| {
                let _ = signals.send(Signal::Snapshot(snapshot));
            },
        ));
        self.bus.publish(&Event::FallbackActivated);
    }

    async fn write_frame(&mut self, frame: String) -> Result<()> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| anyhow!("no live transport"))?;
        sink.send(frame).await
    }

    /// Drop the transport halves and invalidate anything still in flight
    ///
    /// Bumping the generation also discards inbound frames the old reader
    /// already forwarded but the actor has not handled yet. After a failed
    /// write those frames are lost; the server state is picked up again
    /// from what it sends after the next successful connect.
    fn release_link(&mut self) {
        self.sink = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.generation += 1;
    }

    fn transition(&mut self, event: LinkEvent) -> TransitionResult {
        let from = self.fsm.state();
        let result = self.fsm.process_event(event);
        match &result {
            TransitionResult::Success(to) => {
                if from != *to {
                    info!(%from, %to, ?event, "Connection state changed");
                }
                self.state.send_replace(*to);
            }
            TransitionResult::Ignored { state, event } => {
                debug!(%state, ?event, "Event ignored in current state");
            }
            TransitionResult::Invalid { from, event } => {
                warn!(%from, ?event, "Invalid connection state transition");
            }
        }
        result
    }

    fn shutdown(&mut self) {
        self.timer.cancel();
        self.polling = None;
        self.release_link();
        let discarded = self.queue.clear();
        info!(discarded, "Live connection manager shut down");
    }
}
