//! `/health` endpoint.

use std::time::Instant;

use hookrelay_transport::TransportStatus;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` when every backend is connected, `"degraded"` otherwise.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Number of loaded routing rules.
    pub rules: usize,
    /// Per-backend connection state.
    pub backends: Vec<TransportStatus>,
}

/// Build a health response from live state.
pub fn health_check(
    start_time: Instant,
    rules: usize,
    backends: Vec<TransportStatus>,
) -> HealthResponse {
    let status = if backends.iter().all(|b| b.connected) {
        "ok"
    } else {
        "degraded"
    };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        rules,
        backends,
    }
}
