//! The capability set shared by every bot transport.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::Result;
use crate::onebot::{OneBotRequest, OneBotResponse};

/// Which wire a transport speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent WebSocket connection.
    Ws,
    /// One HTTP request per call.
    Http,
}

impl TransportKind {
    /// Short label (`ws` / `http`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named channel to a bot backend.
///
/// Implementations are shared across request handlers, so every method
/// takes `&self`.
#[async_trait]
pub trait BotTransport: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Wire variant.
    fn kind(&self) -> TransportKind;

    /// Whether `send` can currently reach the backend without reconnecting.
    fn is_connected(&self) -> bool;

    /// Timeout used by [`BotTransport::send_default`].
    fn default_timeout(&self) -> Duration;

    /// Prepare the transport for use. Stateless transports have nothing to
    /// do.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Send `request` and wait at most `timeout` for its response.
    async fn send(&self, request: OneBotRequest, timeout: Duration) -> Result<OneBotResponse>;

    /// Send with the transport's configured timeout.
    async fn send_default(&self, request: OneBotRequest) -> Result<OneBotResponse> {
        self.send(request, self.default_timeout()).await
    }

    /// Release resources. Idempotent.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels() {
        assert_eq!(TransportKind::Ws.to_string(), "ws");
        assert_eq!(TransportKind::Http.as_str(), "http");
        assert_eq!(serde_json::to_string(&TransportKind::Http).unwrap(), r#""http""#);
    }
}
