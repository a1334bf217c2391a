//! Persistent WebSocket transport to a OneBot endpoint.
//!
//! One task per connection generation owns the socket: it writes queued
//! outbound frames and demultiplexes inbound frames by their `echo` token.
//! When that task sees the connection end it fails every outstanding
//! request of its generation and hands over to a background reconnect task.
//!
//! State machine (all transitions happen under the link mutex):
//!
//! ```text
//! Disconnected ─start/send─▶ Connecting ─ok─▶ Connected ─lost─▶ Reconnecting
//!      ▲                         │                                 │    │
//!      └──────retries exhausted──┘◀──────────retries exhausted─────┘    │
//!                                            Connected ◀────ok──────────┘
//! any ─stop─▶ Closed ─start─▶ Connecting
//! ```
//!
//! A transport whose background reconnection ran out of attempts stays
//! down: `send` fails with `NotConnected` until `start()` is called. A
//! transport that was never started connects on its first `send`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use hookrelay_core::BackoffPolicy;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::correlation::CorrelationTable;
use crate::errors::{Result, TransportError};
use crate::onebot::{OneBotRequest, OneBotResponse};
use crate::transport::{BotTransport, TransportKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound frames buffered per connection.
const OUTBOUND_BUFFER: usize = 64;

/// How long `stop()` waits for the connection task to send its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle of a [`PersistentTransport`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// Initial connection attempts in progress.
    Connecting,
    /// Connection established; requests flow.
    Connected,
    /// Connection lost; background reconnection in progress.
    Reconnecting,
    /// Stopped explicitly.
    Closed,
}

impl ConnectionState {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters.
#[derive(Clone, Debug)]
pub struct PersistentConfig {
    /// Registry name, used in logs and errors.
    pub name: String,
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Sent as `Authorization: Bearer` on the handshake when non-empty.
    pub access_token: String,
    /// Default per-request timeout; also bounds each handshake.
    pub request_timeout: Duration,
    /// Backoff for `start()` and on-demand connects.
    pub connect: BackoffPolicy,
    /// Backoff for background reconnection.
    pub reconnect: BackoffPolicy,
}

impl PersistentConfig {
    /// Config with default timeouts and backoff.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            access_token: String::new(),
            request_timeout: Duration::from_secs(30),
            connect: BackoffPolicy::connect(),
            reconnect: BackoffPolicy::reconnect(),
        }
    }
}

/// A long-lived, self-healing WebSocket connection with request
/// correlation.
pub struct PersistentTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: PersistentConfig,
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: parking_lot::Mutex<CancellationToken>,
}

/// Everything guarded by the link mutex.
#[derive(Default)]
struct Link {
    state: ConnectionState,
    /// Set when background reconnection gave up; cleared by `start()`.
    down: bool,
    generation: u64,
    outbound: Option<mpsc::Sender<String>>,
    table: Arc<CorrelationTable>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl PersistentTransport {
    /// Create a transport. Nothing is dialled until `start()` or `send()`.
    pub fn new(config: PersistentConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                link: Mutex::new(Link::default()),
                state_tx,
                cancel: parking_lot::Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Requests awaiting a response on the current connection.
    pub async fn pending_requests(&self) -> usize {
        self.inner.link.lock().await.table.len()
    }

    /// Connect, retrying per the connect policy. No-op when connected or
    /// already reconnecting.
    pub async fn start(&self) -> Result<()> {
        let mut link = self.inner.link.lock().await;
        match link.state {
            ConnectionState::Connected | ConnectionState::Reconnecting => Ok(()),
            ConnectionState::Disconnected
            | ConnectionState::Connecting
            | ConnectionState::Closed => {
                {
                    let mut cancel = self.inner.cancel.lock();
                    if cancel.is_cancelled() {
                        *cancel = CancellationToken::new();
                    }
                }
                link.down = false;
                self.inner.connect_locked(&mut link, None).await
            }
        }
    }

    /// Close the connection, cancel background tasks and fail pending
    /// requests. Idempotent.
    pub async fn stop(&self) {
        self.inner.cancel.lock().cancel();

        let (reader, reconnect, table) = {
            let mut link = self.inner.link.lock().await;
            if link.state == ConnectionState::Closed {
                return;
            }
            link.outbound = None;
            self.inner.set_state(&mut link, ConnectionState::Closed);
            (
                link.reader.take(),
                link.reconnect.take(),
                Arc::clone(&link.table),
            )
        };

        if let Some(task) = reconnect {
            task.abort();
        }
        if let Some(mut task) = reader {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                debug!(transport = %self.inner.config.name, "connection task slow to exit, aborting");
                task.abort();
            }
        }

        let failed = table.fail_all(&TransportError::closed("transport stopped"));
        info!(transport = %self.inner.config.name, failed, "transport stopped");
    }
}

impl Drop for PersistentTransport {
    fn drop(&mut self) {
        self.inner.cancel.lock().cancel();
    }
}

#[async_trait]
impl BotTransport for PersistentTransport {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ws
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn default_timeout(&self) -> Duration {
        self.inner.config.request_timeout
    }

    async fn start(&self) -> Result<()> {
        PersistentTransport::start(self).await
    }

    /// `timeout` covers the whole call, including an on-demand connect.
    async fn send(&self, mut request: OneBotRequest, timeout: Duration) -> Result<OneBotResponse> {
        let deadline = Instant::now() + timeout;
        let timed_out = || TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        };
        let (outbound, table) = self.inner.channel(deadline).await.map_err(|e| match e {
            TransportError::Timeout { .. } => timed_out(),
            e => e,
        })?;

        // Register before transmitting so a fast response cannot be missed.
        let pending = table.register();
        request.echo = Some(pending.token().to_string());
        let frame =
            serde_json::to_string(&request).map_err(|e| TransportError::Encode(e.to_string()))?;

        trace!(
            transport = %self.inner.config.name,
            action = %request.action,
            echo = pending.token(),
            "sending request"
        );
        if outbound.send(frame).await.is_err() {
            return Err(TransportError::closed("connection lost"));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out());
        }
        pending.wait(remaining).await.map_err(|e| match e {
            TransportError::Timeout { .. } => timed_out(),
            e => e,
        })
    }

    async fn close(&self) {
        self.stop().await;
    }
}

impl Inner {
    fn set_state(&self, link: &mut Link, state: ConnectionState) {
        if link.state != state {
            debug!(transport = %self.config.name, from = %link.state, to = %state, "state change");
        }
        link.state = state;
        let _ = self.state_tx.send_replace(state);
    }

    /// Outbound queue and correlation table of a live connection,
    /// connecting first (until `deadline`) if the transport was never up.
    async fn channel(
        self: &Arc<Self>,
        deadline: Instant,
    ) -> Result<(mpsc::Sender<String>, Arc<CorrelationTable>)> {
        let mut link = self.link.lock().await;
        match link.state {
            ConnectionState::Connected => {}
            ConnectionState::Closed => return Err(TransportError::closed("transport stopped")),
            ConnectionState::Disconnected | ConnectionState::Connecting if !link.down => {
                self.connect_locked(&mut link, Some(deadline)).await?;
            }
            ConnectionState::Disconnected
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting => {
                return Err(TransportError::NotConnected {
                    name: self.config.name.clone(),
                });
            }
        }
        match &link.outbound {
            Some(tx) => Ok((tx.clone(), Arc::clone(&link.table))),
            None => Err(TransportError::NotConnected {
                name: self.config.name.clone(),
            }),
        }
    }

    /// Dial with the connect policy. With a `deadline`, attempts stop when
    /// it passes and the result is a `Timeout`.
    async fn connect_locked(self: &Arc<Self>, link: &mut Link, deadline: Option<Instant>) -> Result<()> {
        let cancel = self.cancel.lock().clone();
        let policy = &self.config.connect;
        let attempts = policy.attempts();
        let name = &self.config.name;

        self.set_state(link, ConnectionState::Connecting);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let opened = tokio::select! {
                () = cancel.cancelled() => return Err(TransportError::closed("transport stopped")),
                () = expire(deadline) => return Err(self.connect_expired(link)),
                opened = open(&self.config) => opened,
            };
            match opened {
                Ok(ws) => {
                    self.install(link, ws, cancel);
                    info!(transport = %name, url = %self.config.url, "websocket connected");
                    return Ok(());
                }
                Err(reason) => {
                    last_error = reason;
                    if attempt + 1 < attempts {
                        let delay = policy.delay_for(attempt);
                        warn!(
                            transport = %name,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "websocket connect failed, retrying"
                        );
                        tokio::select! {
                            () = cancel.cancelled() => return Err(TransportError::closed("transport stopped")),
                            () = expire(deadline) => return Err(self.connect_expired(link)),
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        self.set_state(link, ConnectionState::Disconnected);
        error!(transport = %name, attempts, error = %last_error, "websocket connect failed, giving up");
        Err(TransportError::Connect {
            url: self.config.url.clone(),
            attempts,
            reason: last_error,
        })
    }

    fn connect_expired(&self, link: &mut Link) -> TransportError {
        self.set_state(link, ConnectionState::Disconnected);
        warn!(transport = %self.config.name, "websocket connect abandoned, request deadline passed");
        // Callers report their own budget.
        TransportError::Timeout { timeout_ms: 0 }
    }

    /// Adopt a freshly opened socket as the next connection generation.
    fn install(self: &Arc<Self>, link: &mut Link, ws: WsStream, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let table = Arc::new(CorrelationTable::new());

        link.generation += 1;
        link.outbound = Some(tx);
        link.table = Arc::clone(&table);
        link.reader = Some(tokio::spawn(connection_loop(
            Arc::clone(self),
            ws,
            rx,
            table,
            link.generation,
            cancel,
        )));
        self.set_state(link, ConnectionState::Connected);
    }

    /// Called by the connection task of `generation` after its socket ended.
    async fn connection_lost(self: &Arc<Self>, generation: u64) {
        let mut link = self.link.lock().await;
        if link.generation != generation || link.state != ConnectionState::Connected {
            return;
        }
        link.outbound = None;
        self.set_state(&mut link, ConnectionState::Reconnecting);
        warn!(transport = %self.config.name, "websocket connection lost, reconnecting");

        let cancel = self.cancel.lock().clone();
        link.reconnect = Some(tokio::spawn(reconnect_loop(
            Arc::clone(self),
            generation,
            cancel,
        )));
    }
}

/// Resolves at `deadline`, or never without one.
async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn open(config: &PersistentConfig) -> std::result::Result<WsStream, String> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;
    if !config.access_token.is_empty() {
        let value = HeaderValue::from_str(&format!("Bearer {}", config.access_token))
            .map_err(|e| e.to_string())?;
        let _ = request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (ws, _) = tokio::time::timeout(config.request_timeout, connect_async(request))
        .await
        .map_err(|_| "handshake timed out".to_string())?
        .map_err(|e| e.to_string())?;
    Ok(ws)
}

async fn connection_loop(
    inner: Arc<Inner>,
    ws: WsStream,
    mut outbound: mpsc::Receiver<String>,
    table: Arc<CorrelationTable>,
    generation: u64,
    cancel: CancellationToken,
) {
    let name = inner.config.name.clone();
    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break "transport stopped";
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break "transport stopped" };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    warn!(transport = %name, error = %e, "websocket write failed");
                    break "connection lost";
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = dispatch_frame(&table, text.as_str()) {
                        warn!(transport = %name, error = %e, "unreadable frame");
                        break "unreadable frame";
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let dispatched = std::str::from_utf8(&bytes)
                        .map_err(|e| e.to_string())
                        .and_then(|text| dispatch_frame(&table, text).map_err(|e| e.to_string()));
                    if let Err(e) = dispatched {
                        warn!(transport = %name, error = %e, "unreadable frame");
                        break "unreadable frame";
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(transport = %name, ?frame, "websocket closed by peer");
                    break "connection lost";
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(transport = %name, error = %e, "websocket read failed");
                    break "connection lost";
                }
                None => {
                    warn!(transport = %name, "websocket stream ended");
                    break "connection lost";
                }
            }
        }
    };

    // Refuse new frames before failing waiters so none slip in between.
    outbound.close();
    let _ = table.fail_all(&TransportError::closed(reason));

    if cancel.is_cancelled() {
        return;
    }
    inner.connection_lost(generation).await;
}

async fn reconnect_loop(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    let policy = inner.config.reconnect.clone();
    let name = inner.config.name.clone();
    let attempts = policy.attempts();

    for attempt in 0..attempts {
        let delay = policy.delay_for(attempt);
        info!(
            transport = %name,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let opened = tokio::select! {
            () = cancel.cancelled() => return,
            opened = open(&inner.config) => opened,
        };
        match opened {
            Ok(ws) => {
                let mut link = inner.link.lock().await;
                if cancel.is_cancelled()
                    || link.state != ConnectionState::Reconnecting
                    || link.generation != generation
                {
                    return;
                }
                inner.install(&mut link, ws, cancel);
                info!(transport = %name, "websocket reconnected");
                return;
            }
            Err(e) => warn!(transport = %name, attempt = attempt + 1, error = %e, "reconnect failed"),
        }
    }

    let mut link = inner.link.lock().await;
    if link.state == ConnectionState::Reconnecting && link.generation == generation {
        link.down = true;
        inner.set_state(&mut link, ConnectionState::Disconnected);
        error!(
            transport = %name,
            attempts,
            "reconnection exhausted, transport is down until restarted"
        );
    }
}

/// Route one inbound frame to its waiter.
///
/// Frames without an `echo` (events, heartbeats) and unknown tokens are
/// dropped. Only non-JSON input is an error.
fn dispatch_frame(table: &CorrelationTable, text: &str) -> serde_json::Result<()> {
    let value: Value = serde_json::from_str(text)?;
    let Some(echo) = value.get("echo").and_then(Value::as_str).map(str::to_owned) else {
        trace!(frame = %text, "frame without echo, discarding");
        return Ok(());
    };

    match serde_json::from_value::<OneBotResponse>(value) {
        Ok(response) => {
            let _ = table.resolve(&echo, response);
        }
        Err(e) => {
            let _ = table.reject(&echo, TransportError::Protocol(e.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_labels() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connected).unwrap(),
            r#""connected""#
        );
    }

    #[test]
    fn config_defaults() {
        let config = PersistentConfig::new("onebot", "ws://127.0.0.1:3001");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.connect.max_attempts, 5);
        assert_eq!(config.reconnect.max_delay_ms, 60_000);
    }

    #[tokio::test]
    async fn dispatch_resolves_known_echo() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.register();
        let frame = format!(r#"{{"status":"ok","retcode":0,"echo":"{}"}}"#, pending.token());

        dispatch_frame(&table, &frame).unwrap();
        let response = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert!(response.is_ok());
    }

    #[test]
    fn dispatch_ignores_events_and_unknown_echo() {
        let table = Arc::new(CorrelationTable::new());
        let _pending = table.register();

        dispatch_frame(&table, r#"{"post_type":"meta_event","meta_event_type":"heartbeat"}"#)
            .unwrap();
        dispatch_frame(&table, r#"{"status":"ok","echo":"stale"}"#).unwrap();
        dispatch_frame(&table, r#"{"status":"ok","echo":7}"#).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn dispatch_rejects_non_json() {
        let table = CorrelationTable::new();
        assert!(dispatch_frame(&table, "not json").is_err());
    }

    #[tokio::test]
    async fn dispatch_malformed_response_fails_waiter() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.register();
        let frame = format!(r#"{{"status":5,"echo":"{}"}}"#, pending.token());

        dispatch_frame(&table, &frame).unwrap();
        assert!(matches!(
            pending.wait(Duration::from_secs(1)).await,
            Err(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn stop_before_start_closes() {
        let transport = PersistentTransport::new(PersistentConfig::new("t", "ws://127.0.0.1:1"));
        transport.stop().await;
        assert_eq!(transport.state(), ConnectionState::Closed);

        let err = transport
            .send(OneBotRequest::new("x", Value::Null), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::closed("transport stopped"));
    }
}
