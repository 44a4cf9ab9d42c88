//! Endpoint derivation from the hosting origin

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

/// Live transport URL for an origin: `http` upgrades to `ws`, `https` to `wss`
pub fn live_url(origin: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(origin).with_context(|| format!("Invalid origin: {}", origin))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => bail!("Unsupported origin scheme: {}", other),
    };
    url.set_scheme(scheme)
        .map_err(|()| anyhow!("Cannot switch {} to {}", origin, scheme))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Snapshot resource on the same origin, always plain HTTP(S)
pub fn snapshot_url(origin: &str, path: &str) -> Result<Url> {
    let base = Url::parse(origin).with_context(|| format!("Invalid origin: {}", origin))?;
    match base.scheme() {
        "http" | "https" => {}
        other => bail!("Unsupported origin scheme: {}", other),
    }
    base.join(path)
        .with_context(|| format!("Invalid snapshot path: {}", path))
}
