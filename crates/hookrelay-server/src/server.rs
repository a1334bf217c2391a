//! `RelayServer`: the Axum listener around a [`Dispatcher`].

use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use hookrelay_settings::ServerSettings;
use tokio::net::TcpListener;
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::routes::{self, AppState};
use crate::shutdown::ShutdownCoordinator;

/// The webhook relay HTTP server.
pub struct RelayServer {
    settings: ServerSettings,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server. Nothing is bound until [`RelayServer::bind`].
    pub fn new(settings: ServerSettings, dispatcher: Dispatcher) -> Self {
        Self {
            settings,
            dispatcher: Arc::new(dispatcher),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            start_time: self.start_time,
        };
        routes::router(state, &self.settings.webhook_path)
    }

    /// Bind `host:port` from the settings.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind((self.settings.host.as_str(), self.settings.port)).await
    }

    /// Serve on `listener` until the shutdown coordinator fires.
    ///
    /// In-flight requests are allowed to finish.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, webhook_path = %self.settings.webhook_path, "listening");

        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(token.cancelled_owned())
            .await?;

        info!("listener stopped");
        Ok(())
    }

    /// The dispatcher behind the webhook route.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The listener settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hookrelay_core::RuleIndexHandle;
    use hookrelay_transport::TransportRegistry;
    use tower::ServiceExt;

    use super::*;

    fn make_server(webhook_path: &str) -> RelayServer {
        let settings = ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            webhook_path: webhook_path.into(),
        };
        let dispatcher =
            Dispatcher::new(RuleIndexHandle::default(), Arc::new(TransportRegistry::new()));
        RelayServer::new(settings, dispatcher)
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server("/hook");
        assert!(!server.shutdown().is_shutting_down());
        assert!(server.dispatcher().rules().load().is_empty());
    }

    #[tokio::test]
    async fn webhook_route_follows_settings() {
        let server = make_server("/custom/hook");
        let req = Request::builder()
            .method("POST")
            .uri("/custom/hook")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder()
            .method("POST")
            .uri("/github-webhook")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let server = Arc::new(make_server("/hook"));
        let listener = server.bind().await.unwrap();

        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };
        server.shutdown().shutdown();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
