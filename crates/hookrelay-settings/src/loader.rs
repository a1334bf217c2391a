//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "HOOKRELAY_CONFIG";
/// Settings file used when neither a flag nor [`CONFIG_ENV`] names one.
pub const DEFAULT_CONFIG_FILE: &str = "hookrelay.json";

/// Resolve the settings file path: `$HOOKRELAY_CONFIG`, else
/// `./hookrelay.json`.
pub fn settings_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns (validated) defaults. Invalid JSON
/// or a failed validation is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides or
/// validation.
pub fn read_settings_file(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Write [`RelaySettings::sample()`] to `path` as pretty JSON.
///
/// Refuses to overwrite an existing file.
pub fn write_sample_settings(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(crate::SettingsError::InvalidValue(format!(
            "{} already exists",
            path.display()
        )));
    }
    let json = serde_json::to_string_pretty(&RelaySettings::sample())?;
    std::fs::write(path, json + "\n")?;
    info!(?path, "wrote sample settings");
    Ok(())
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (file/default value kept).
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = read_env_string("HOOKRELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("HOOKRELAY_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("HOOKRELAY_WEBHOOK_PATH") {
        settings.server.webhook_path = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = read_env_string("HOOKRELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("HOOKRELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use crate::types::Protocol;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 8000, "host": "0.0.0.0"}
        });
        let source = serde_json::json!({
            "server": {"port": 9090}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"rules": [1, 2, 3]});
        let source = serde_json::json!({"rules": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["rules"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"b": 2});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
    }

    #[test]
    fn merge_empty_source() {
        let target = serde_json::json!({"a": 1, "b": {"c": 2}});
        let merged = deep_merge(target.clone(), serde_json::json!({}));
        assert_eq!(merged, target);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/hookrelay.json");
        let settings = read_settings_file(path).unwrap();
        assert_eq!(settings.server.port, 8000);
        assert!(settings.rules.is_empty());
    }

    #[test]
    fn load_empty_json_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookrelay.json");
        std::fs::write(&path, "{}").unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.webhook_path, "/github-webhook");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookrelay.json");
        std::fs::write(&path, r#"{"server": {"port": 9090}, "logging": {"json": true}}"#).unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(settings.logging.json);
    }

    #[test]
    fn load_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookrelay.json");
        std::fs::write(
            &path,
            r#"{
                "backends": [
                    {"name": "onebot", "protocol": "ws", "url": "ws://127.0.0.1:3001",
                     "accessToken": "t", "reconnect": {"maxAttempts": 3}},
                    {"name": "hook", "protocol": "http", "url": "http://127.0.0.1:5700"}
                ],
                "rules": [
                    {"name": "org", "repos": ["org/*"], "branches": ["main"],
                     "events": ["push"], "secret": "s",
                     "targets": [{"type": "group", "id": 1},
                                 {"backend": "hook", "type": "private", "id": "2"}]}
                ]
            }"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.backends.len(), 2);
        assert_eq!(settings.backends[0].reconnect.max_attempts, 3);
        assert_eq!(settings.backends[0].reconnect.base_delay_ms, 5_000);
        assert_eq!(settings.backends[1].protocol, Protocol::Http);

        let index = settings.rule_index();
        let rule = index.resolve("org/api", Some("main"), "push").unwrap();
        assert_eq!(rule.destinations().len(), 2);
        assert_eq!(rule.destinations()[1].to_string(), "hook:private:2");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookrelay.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookrelay.json");
        std::fs::write(
            &path,
            r#"{"backends": [{"name": "onebot", "protocol": "http", "url": "ws://x"}]}"#,
        )
        .unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn sample_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookrelay.json");
        write_sample_settings(&path).unwrap();

        let settings = read_settings_file(&path).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.rules[0].name, "github");

        // Second write refuses to clobber.
        assert!(write_sample_settings(&path).is_err());
    }

    // ── parse helpers ───────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "NO"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u16_range("port", 1, 65535), None);
    }
}
