//! # hookrelay-settings
//!
//! Layered configuration for the hookrelay webhook relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `./hookrelay.json` or `$HOOKRELAY_CONFIG`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `HOOKRELAY_*` overrides (highest priority)
//!
//! The loaded settings are validated before use and converted into the
//! core [`RuleIndex`](hookrelay_core::RuleIndex) via
//! [`RelaySettings::rule_index`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, settings_path, write_sample_settings,
};
pub use types::*;
