//! Correlation of in-flight requests with asynchronously arriving responses.
//!
//! Each outstanding request owns a [`PendingResponse`] holding a fresh
//! random token and the receiving half of a one-shot slot. The reader loop
//! completes slots by token; whichever of response, timeout or connection
//! loss happens first consumes the slot, and the registration is removed in
//! every case (including when the waiting future is dropped).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::errors::{Result, TransportError};
use crate::onebot::OneBotResponse;

type Slot = oneshot::Sender<Result<OneBotResponse>>;

/// Map from correlation token to a waiting caller.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, Slot>>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request under a fresh token.
    pub fn register(self: &Arc<Self>) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        let token = loop {
            let candidate = Uuid::new_v4().to_string();
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };
        let _ = pending.insert(token.clone(), tx);
        PendingResponse {
            token,
            rx,
            table: Arc::clone(self),
        }
    }

    /// Deliver `response` to the caller waiting on `token`.
    ///
    /// Returns `false` when the token is unknown (already timed out,
    /// already answered, or never issued).
    pub fn resolve(&self, token: &str, response: OneBotResponse) -> bool {
        self.complete(token, Ok(response))
    }

    /// Fail the caller waiting on `token` with `error`.
    pub fn reject(&self, token: &str, error: TransportError) -> bool {
        self.complete(token, Err(error))
    }

    fn complete(&self, token: &str, result: Result<OneBotResponse>) -> bool {
        let Some(slot) = self.pending.lock().remove(token) else {
            trace!(token, "no pending request for token");
            return false;
        };
        // The waiter may have been dropped between removal and send.
        slot.send(result).is_ok()
    }

    /// Fail every outstanding request with `error`. Returns how many were
    /// failed.
    pub fn fail_all(&self, error: &TransportError) -> usize {
        let drained: Vec<Slot> = self.pending.lock().drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        for slot in drained {
            let _ = slot.send(Err(error.clone()));
        }
        if count > 0 {
            warn!(count, %error, "failed pending requests");
        }
        count
    }

    /// Whether `token` is currently registered.
    pub fn contains(&self, token: &str) -> bool {
        self.pending.lock().contains_key(token)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn remove(&self, token: &str) -> bool {
        self.pending.lock().remove(token).is_some()
    }
}

/// A registered request awaiting its response.
#[derive(Debug)]
pub struct PendingResponse {
    token: String,
    rx: oneshot::Receiver<Result<OneBotResponse>>,
    table: Arc<CorrelationTable>,
}

impl PendingResponse {
    /// The correlation token to put on the wire.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the response, at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<OneBotResponse> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::closed("response slot dropped")),
            Err(_) => {
                let _ = self.table.remove(&self.token);
                warn!(token = %self.token, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        let _ = self.table.remove(&self.token);
    }
}
