//! Snapshot sources for the polling fallback

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

/// One-shot read of the server's current state
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetch the snapshot; every top-level key becomes one notification
    async fn fetch(&self) -> Result<Map<String, Value>>;
}

/// GETs a JSON object from the snapshot endpoint
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpSnapshotSource {
    pub fn new(url: Url, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build snapshot HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<Map<String, Value>> {
        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("Snapshot request to {} failed", self.url))?
            .error_for_status()?;

        match response.json::<Value>().await.context("Snapshot body is not JSON")? {
            Value::Object(snapshot) => Ok(snapshot),
            other => bail!("Snapshot body is not a JSON object: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn source_for(server: &MockServer) -> HttpSnapshotSource {
        let url = Url::parse(&format!("{}/api/live/snapshot/", server.uri())).expect("valid url");
        HttpSnapshotSource::new(url, Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn test_fetch_returns_top_level_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/live/snapshot/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "presence": [{"user_id": "7"}],
                "connections": 3
            })))
            .mount(&server)
            .await;

        let snapshot = source_for(&server).await.fetch().await.expect("fetch");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["connections"], 3);
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(source_for(&server).await.fetch().await.is_err());
    }

    #[tokio::test]
    async fn test_non_object_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
            .mount(&server)
            .await;

        let err = source_for(&server).await.fetch().await.expect_err("array body");
        assert!(err.to_string().contains("not a JSON object"));
    }
}
