//! Named transport registry.
//!
//! The dispatcher owns one [`TransportRegistry`] and looks transports up by
//! the name carried in each destination. The registry also owns the
//! start-up and shutdown lifecycle of everything registered in it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{Result, TransportError};
use crate::transport::{BotTransport, TransportKind};

/// Snapshot of one registered transport, for health reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransportStatus {
    /// Registry name.
    pub name: String,
    /// Wire variant.
    pub kind: TransportKind,
    /// Whether the transport can currently deliver without reconnecting.
    pub connected: bool,
}

/// Registry of named bot transports.
#[derive(Default)]
pub struct TransportRegistry {
    transports: RwLock<BTreeMap<String, Arc<dyn BotTransport>>>,
    /// Serializes `register` across the await on a superseded transport.
    registration: tokio::sync::Mutex<()>,
}

impl TransportRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transport` under its own name.
    ///
    /// With `replace` unset a duplicate name is an error. With `replace`
    /// set the superseded transport is closed before the new one is
    /// installed.
    pub async fn register(&self, transport: Arc<dyn BotTransport>, replace: bool) -> Result<()> {
        let name = transport.name().to_string();
        let _guard = self.registration.lock().await;

        let previous = {
            let mut transports = self.transports.write();
            if transports.contains_key(&name) && !replace {
                return Err(TransportError::Registration { name });
            }
            transports.remove(&name)
        };

        if let Some(old) = previous {
            debug!(transport = %name, "closing superseded transport");
            old.close().await;
        }

        debug!(transport = %name, kind = %transport.kind(), "registering transport");
        let _ = self.transports.write().insert(name, transport);
        Ok(())
    }

    /// Look up a transport by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn BotTransport>> {
        self.transports.read().get(name).cloned()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.transports.read().contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.transports.read().keys().cloned().collect()
    }

    /// Number of registered transports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transports.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.read().is_empty()
    }

    /// Status of every transport, sorted by name.
    #[must_use]
    pub fn statuses(&self) -> Vec<TransportStatus> {
        self.transports
            .read()
            .values()
            .map(|t| TransportStatus {
                name: t.name().to_string(),
                kind: t.kind(),
                connected: t.is_connected(),
            })
            .collect()
    }

    /// Start every transport. Failures are logged and returned; they do
    /// not stop the remaining transports from starting.
    pub async fn start_all(&self) -> Vec<(String, TransportError)> {
        let mut failures = Vec::new();
        for transport in self.snapshot() {
            match transport.start().await {
                Ok(()) => info!(transport = transport.name(), kind = %transport.kind(), "transport started"),
                Err(e) => {
                    warn!(transport = transport.name(), error = %e, "transport failed to start");
                    failures.push((transport.name().to_string(), e));
                }
            }
        }
        failures
    }

    /// Close and unregister one transport. Returns `false` if unknown.
    pub async fn close(&self, name: &str) -> bool {
        let removed = self.transports.write().remove(name);
        match removed {
            Some(transport) => {
                transport.close().await;
                true
            }
            None => false,
        }
    }

    /// Close and unregister every transport. Idempotent.
    pub async fn close_all(&self) {
        let drained: Vec<_> = std::mem::take(&mut *self.transports.write())
            .into_values()
            .collect();
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        for transport in drained {
            transport.close().await;
        }
        info!(count, "closed all transports");
    }

    fn snapshot(&self) -> Vec<Arc<dyn BotTransport>> {
        self.transports.read().values().cloned().collect()
    }
}
