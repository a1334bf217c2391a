//! Stateless HTTP transport: one `POST {url}/{action}` per request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::{Result, TransportError};
use crate::onebot::{OneBotRequest, OneBotResponse};
use crate::transport::{BotTransport, TransportKind};

/// Connection parameters for [`StatelessTransport`].
#[derive(Clone, Debug)]
pub struct StatelessConfig {
    /// Registry name.
    pub name: String,
    /// `http://` or `https://` base URL; the action name is appended.
    pub url: String,
    /// Sent as `Authorization: Bearer` when non-empty.
    pub access_token: String,
    /// Default per-request timeout.
    pub request_timeout: Duration,
}

impl StatelessConfig {
    /// Config with the default timeout.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            access_token: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// OneBot over plain HTTP, backed by `reqwest`.
pub struct StatelessTransport {
    config: StatelessConfig,
    client: reqwest::Client,
    closed: AtomicBool,
}

impl StatelessTransport {
    /// Create a transport with its own connection pool.
    pub fn new(config: StatelessConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hookrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self::with_client(config, client)
    }

    /// Create a transport sharing an existing client.
    pub fn with_client(config: StatelessConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            closed: AtomicBool::new(false),
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{action}", self.config.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl BotTransport for StatelessTransport {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn default_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    async fn start(&self) -> Result<()> {
        self.closed.store(false, Ordering::Release);
        Ok(())
    }

    async fn send(&self, request: OneBotRequest, timeout: Duration) -> Result<OneBotResponse> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed("transport stopped"));
        }

        let url = self.endpoint(&request.action);
        debug!(transport = %self.config.name, %url, "posting request");

        let mut builder = self.client.post(&url).timeout(timeout).json(&request.params);
        if !self.config.access_token.is_empty() {
            builder = builder.bearer_auth(&self.config.access_token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(transport = %self.config.name, status = status.as_u16(), "endpoint rejected request");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                TransportError::Http(e.to_string())
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_action() {
        let t = StatelessTransport::new(StatelessConfig::new("h", "http://127.0.0.1:5700/"));
        assert_eq!(t.endpoint("send_msg"), "http://127.0.0.1:5700/send_msg");
        let t = StatelessTransport::new(StatelessConfig::new("h", "http://host/api"));
        assert_eq!(t.endpoint("send_msg"), "http://host/api/send_msg");
    }

    #[tokio::test]
    async fn close_marks_disconnected() {
        let t = StatelessTransport::new(StatelessConfig::new("h", "http://127.0.0.1:1"));
        assert!(t.is_connected());
        t.close().await;
        assert!(!t.is_connected());
        let err = t
            .send(OneBotRequest::new("send_msg", serde_json::json!({})), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::closed("transport stopped"));
    }
}
