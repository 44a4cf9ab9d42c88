use anyhow::{Context, Result};
use livelink::{load_config, Category, ConnectionManager, Event, LiveConfig, OutboundMessage};
use livelink_shared::codec;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match std::env::args().nth(1).or_else(|| std::env::var("LIVELINK_CONFIG").ok()) {
        Some(path) => load_config(&path)?,
        None => LiveConfig::default(),
    };

    info!("Live client starting as user {}", config.identity.user_id);
    info!("  Endpoint: {}", config.endpoint.origin);

    let manager = ConnectionManager::from_config(&config).context("Failed to build connection manager")?;
    if !manager.is_enabled() {
        info!("Live connection disabled by configuration; exiting");
        return Ok(());
    }

    // Status reporter: one handler for every lifecycle category
    let reporter: livelink::dispatch::Callback = Arc::new(|event: &Event| match event {
        Event::Connected => info!("[STATUS] live"),
        Event::Disconnected { reason } => warn!("[STATUS] offline: {}", reason),
        Event::ReconnectScheduled { attempt, delay } => {
            info!("[STATUS] reconnecting (attempt {}) in {:?}", attempt, delay)
        }
        Event::FallbackActivated => warn!("[STATUS] polling for updates"),
        Event::FallbackData { key, value } => info!("[POLL] {} = {}", key, value),
        Event::Message(message) => info!("[LIVE] {} {:?}", message.kind(), message.fields()),
    });
    for category in Category::ALL {
        manager.on_shared(category, reporter.clone());
    }
    manager.on_tagged(|kind, fields| {
        if kind == livelink_shared::types::USER_JOINED || kind == livelink_shared::types::USER_LEFT {
            info!("[PRESENCE] {} {:?}", kind, fields.get("user_id"));
        }
    });

    manager.connect();

    // Each stdin line is a JSON object with a `type` field
    let input_manager = manager.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match codec::split_frame(&line) {
                    Ok((kind, payload)) => {
                        let outcome = input_manager
                            .send(OutboundMessage::with_payload(kind, payload))
                            .await;
                        info!("Sent: {:?}", outcome);
                    }
                    Err(e) => error!("Invalid input line: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    manager.close().await;

    Ok(())
}
