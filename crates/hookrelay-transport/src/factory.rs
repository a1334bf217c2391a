//! Build transports from backend settings.

use std::sync::Arc;
use std::time::Duration;

use hookrelay_settings::{BackendSettings, Protocol};

use crate::errors::Result;
use crate::persistent::{PersistentConfig, PersistentTransport};
use crate::registry::TransportRegistry;
use crate::stateless::{StatelessConfig, StatelessTransport};
use crate::transport::BotTransport;

/// Build the transport variant selected by `settings.protocol`.
pub fn build_transport(settings: &BackendSettings) -> Arc<dyn BotTransport> {
    let request_timeout = Duration::from_millis(settings.request_timeout_ms);
    match settings.protocol {
        Protocol::Ws => Arc::new(PersistentTransport::new(PersistentConfig {
            name: settings.name.clone(),
            url: settings.url.clone(),
            access_token: settings.access_token.clone(),
            request_timeout,
            connect: settings.connect.clone(),
            reconnect: settings.reconnect.clone(),
        })),
        Protocol::Http => Arc::new(StatelessTransport::new(StatelessConfig {
            name: settings.name.clone(),
            url: settings.url.clone(),
            access_token: settings.access_token.clone(),
            request_timeout,
        })),
    }
}

impl TransportRegistry {
    /// Build and register one transport per backend. Nothing is dialled;
    /// call [`TransportRegistry::start_all`] afterwards.
    pub async fn from_settings(backends: &[BackendSettings]) -> Result<Self> {
        let registry = Self::new();
        for backend in backends {
            registry.register(build_transport(backend), false).await?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportKind;

    fn backend(name: &str, protocol: Protocol, url: &str) -> BackendSettings {
        BackendSettings {
            name: name.into(),
            protocol,
            url: url.into(),
            request_timeout_ms: 1500,
            ..BackendSettings::default()
        }
    }

    #[test]
    fn builds_by_protocol() {
        let ws = build_transport(&backend("ws", Protocol::Ws, "ws://127.0.0.1:1"));
        assert_eq!(ws.kind(), TransportKind::Ws);
        assert!(!ws.is_connected());
        assert_eq!(ws.default_timeout(), Duration::from_millis(1500));

        let http = build_transport(&backend("http", Protocol::Http, "http://127.0.0.1:1"));
        assert_eq!(http.kind(), TransportKind::Http);
        assert_eq!(http.name(), "http");
    }

    #[tokio::test]
    async fn registry_from_settings() {
        let registry = TransportRegistry::from_settings(&[
            backend("a", Protocol::Ws, "ws://127.0.0.1:1"),
            backend("b", Protocol::Http, "http://127.0.0.1:1"),
        ])
        .await
        .unwrap();
        assert_eq!(registry.names(), ["a", "b"]);
    }

    #[tokio::test]
    async fn duplicate_backends_rejected() {
        let result = TransportRegistry::from_settings(&[
            backend("a", Protocol::Http, "http://x"),
            backend("a", Protocol::Http, "http://y"),
        ])
        .await;
        assert!(result.is_err());
    }
}
