#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::channel::mpsc as chan;
use futures::SinkExt;
use livelink::dispatch::Event;
use livelink::polling::SnapshotSource;
use livelink::transport::{TransportConnector, TransportLink};
use livelink::{Category, ConnectionManager};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use url::Url;

/// What the next connection attempt does
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Fail,
    Succeed,
    /// Never completes; only the connect timeout ends it
    Hang,
}

/// The server side of an in-memory link
pub struct PeerEnd {
    /// Frames the client wrote
    pub sent: chan::UnboundedReceiver<String>,
    /// Push frames (or errors) to the client
    pub inbound: chan::UnboundedSender<Result<String>>,
}

/// Connector that follows a script; attempts past the end of it fail
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    attempts: AtomicU32,
    last_url: Mutex<Option<Url>>,
    peers: mpsc::UnboundedSender<PeerEnd>,
}

impl ScriptedConnector {
    pub fn new(script: &[Outcome]) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEnd>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            attempts: AtomicU32::new(0),
            last_url: Mutex::new(None),
            peers,
        });
        (connector, peer_rx)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<Url> {
        self.last_url.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<TransportLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock().unwrap() = Some(url.clone());

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Outcome::Fail);
        match outcome {
            Outcome::Fail => Err(anyhow!("connection refused")),
            Outcome::Hang => std::future::pending::<Result<TransportLink>>().await,
            Outcome::Succeed => {
                let (out_tx, out_rx) = chan::unbounded::<String>();
                let (in_tx, in_rx) = chan::unbounded::<Result<String>>();
                let _ = self.peers.send(PeerEnd {
                    sent: out_rx,
                    inbound: in_tx,
                });
                Ok(TransportLink {
                    sink: Box::pin(out_tx.sink_map_err(anyhow::Error::from)),
                    stream: Box::pin(in_rx),
                })
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Snapshot source returning a fixed object and counting fetches
pub struct CountingSource {
    calls: AtomicU32,
}

impl CountingSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for CountingSource {
    async fn fetch(&self) -> Result<Map<String, Value>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(object(json!({"presence": [], "connections": call})))
    }
}

/// Forward every event of the given categories into a channel
pub fn record(manager: &ConnectionManager, categories: &[Category]) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    for category in categories {
        let tx = tx.clone();
        manager.on(*category, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

/// Forward every tagged notification into a channel
pub fn record_tagged(manager: &ConnectionManager) -> mpsc::UnboundedReceiver<(String, Map<String, Value>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on_tagged(move |kind, fields| {
        let _ = tx.send((kind.to_string(), fields.clone()));
    });
    rx
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn parse(frame: &str) -> Value {
    serde_json::from_str(frame).expect("client wrote valid JSON")
}
