use anyhow::{bail, Context, Result};
use livelink_shared::{lifecycle, Identity};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::transport::endpoint;

/// Complete client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// Master switch; a disabled client turns every operation into a no-op
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path prefixes on which the client must not run
    #[serde(default)]
    pub disabled_paths: Vec<String>,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub identity: Identity,
}

fn default_enabled() -> bool {
    true
}

/// Where the server lives
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Hosting origin; its scheme decides ws vs wss
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_live_path")]
    pub path: String,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

fn default_origin() -> String {
    "http://127.0.0.1:8000".into()
}

fn default_live_path() -> String {
    lifecycle::LIVE_PATH.into()
}

fn default_snapshot_path() -> String {
    lifecycle::SNAPSHOT_PATH.into()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            path: default_live_path(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

/// Reconnect backoff
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_base_delay() -> u64 {
    lifecycle::RECONNECT_BASE_DELAY_MS
}

fn default_max_attempts() -> u32 {
    lifecycle::RECONNECT_MAX_ATTEMPTS
}

fn default_connect_timeout() -> u64 {
    lifecycle::CONNECT_TIMEOUT_MS
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_attempts: default_max_attempts(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// Snapshot polling once reconnects are exhausted
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_poll_interval() -> u64 {
    lifecycle::POLL_INTERVAL_MS
}

fn default_request_timeout() -> u64 {
    lifecycle::POLL_REQUEST_TIMEOUT_MS
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// Offline queue limits
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
    /// Oldest messages are evicted beyond this; unset means unbounded
    #[serde(default)]
    pub max_messages: Option<usize>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            disabled_paths: Vec::new(),
            endpoint: EndpointConfig::default(),
            reconnect: ReconnectConfig::default(),
            fallback: FallbackConfig::default(),
            queue: QueueConfig::default(),
            identity: Identity::default(),
        }
    }
}

impl LiveConfig {
    /// Whether a manager built from this config should run at all
    pub fn should_run(&self) -> bool {
        self.enabled
            && !self
                .disabled_paths
                .iter()
                .any(|prefix| self.identity.path.starts_with(prefix.as_str()))
    }

    pub fn live_url(&self) -> Result<Url> {
        endpoint::live_url(&self.endpoint.origin, &self.endpoint.path)
    }

    pub fn snapshot_url(&self) -> Result<Url> {
        endpoint::snapshot_url(&self.endpoint.origin, &self.endpoint.snapshot_path)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect.base_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.fallback.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback.request_timeout_ms)
    }

    /// Reject values the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.fallback.poll_interval_ms == 0 {
            bail!("fallback.poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<LiveConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: LiveConfig =
        toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path))?;
    Ok(config)
}
