mod routes;
mod session;

use anyhow::Context;
use session::SessionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_BIND: &str = "0.0.0.0:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let bind = std::env::var("LIVELINK_BIND").unwrap_or_else(|_| DEFAULT_BIND.into());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Server listening on {}", bind);

    let sessions = Arc::new(SessionManager::new());
    axum::serve(listener, routes::router(sessions))
        .await
        .context("Server error")?;

    Ok(())
}
