//! Backoff schedules for connection attempts.
//!
//! Provides the portable, sync-only math. The async loops that sleep between
//! attempts live in `hookrelay-transport`.
//!
//! Formula: `min(max_delay, base_delay * multiplier^attempt)`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default attempt budget for the initial connect.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
/// Default base delay for the initial connect, in milliseconds.
pub const DEFAULT_CONNECT_BASE_DELAY_MS: u64 = 2_000;
/// Default delay cap for the initial connect, in milliseconds.
pub const DEFAULT_CONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Default attempt budget for background reconnection.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;
/// Default base delay for background reconnection, in milliseconds.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 5_000;
/// Default delay cap for background reconnection, in milliseconds.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 60_000;

/// Default growth factor between consecutive delays.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// A bounded exponential backoff schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Attempts allowed before giving up (at least one is always made).
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Schedule used for the initial connect.
    pub fn connect() -> Self {
        Self {
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            base_delay_ms: DEFAULT_CONNECT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_CONNECT_MAX_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Schedule used when recovering a dropped connection.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Attempt budget, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let exponent = attempt.min(64) as i32;
        let scaled = (self.base_delay_ms as f64) * multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }

    /// All delays in the schedule: one between each pair of attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts().saturating_sub(1)).map(|attempt| self.delay_for(attempt))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::connect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
