//! Transport to the explorer server
//!
//! `Transport` moves one JSON request to an endpoint and hands back the raw
//! JSON response. `HttpTransport` POSTs to `{server_url}/{endpoint}`; the
//! in-memory `fakes::MemoryBackend` implements the same trait for tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::WireError;
use crate::protocol::Endpoint;
use crate::WireResult;

/// Default explorer server address
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3001";

/// Request/response transport.
///
/// Implementations return the decoded JSON body whatever its `status`;
/// only failures to obtain a body are errors here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, endpoint: Endpoint, body: Value) -> WireResult<Value>;
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Explorer server URL
    pub server_url: String,
    /// Per-request timeout; the protocol has none of its own
    pub timeout: Option<Duration>,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            server_url: DEFAULT_SERVER_URL.to_string(),
            timeout: None,
            user_agent: concat!("paramex/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl RemoteConfig {
    /// Create config for a specific server
    pub fn new(server_url: &str) -> Self {
        RemoteConfig {
            server_url: server_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Set a per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// JSON-over-HTTP transport
pub struct HttpTransport {
    config: RemoteConfig,
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(config: RemoteConfig) -> WireResult<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| WireError::Config(e.to_string()))?;

        Ok(HttpTransport {
            config,
            http_client,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.config.server_url, endpoint.path())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, endpoint: Endpoint, body: Value) -> WireResult<Value> {
        let url = self.url(endpoint);
        debug!(%url, "POST");

        let transport_err = |e: reqwest::Error| WireError::Transport {
            endpoint,
            reason: e.to_string(),
        };

        // Error statuses come back with 4xx/5xx codes but still carry a JSON body.
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;
        let http_status = response.status();

        response
            .json::<Value>()
            .await
            .map_err(|e| WireError::MalformedResponse {
                endpoint,
                reason: format!("HTTP {http_status}: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_config_default() {
        let config = RemoteConfig::default();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert!(config.timeout.is_none());
        assert!(config.user_agent.starts_with("paramex/"));
    }

    #[test]
    fn test_remote_config_trims_trailing_slash() {
        let config = RemoteConfig::new("http://example.com:3001/")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.server_url, "http://example.com:3001");
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_http_transport_builds_endpoint_urls() {
        let transport = HttpTransport::new(RemoteConfig::new("http://localhost:3001")).unwrap();
        assert_eq!(
            transport.url(Endpoint::AgentPlay),
            "http://localhost:3001/agent/play"
        );
        assert_eq!(transport.server_url(), "http://localhost:3001");
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_gracefully() {
        // Port 9 (discard) is almost never bound; the call must error, not panic.
        let transport = HttpTransport::new(
            RemoteConfig::new("http://127.0.0.1:9").with_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        let result = transport
            .call(Endpoint::LoadData, serde_json::json!({"session_id": "s"}))
            .await;
        assert!(result.is_err());
    }
}
