//! Settings types.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! partial JSON file deserializes with the remaining fields at their
//! compiled defaults.

use std::collections::HashSet;
use std::fmt;

use hookrelay_core::{BackoffPolicy, Destination, Rule, RuleIndex};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{Result, SettingsError};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8000;
/// Default webhook route.
pub const DEFAULT_WEBHOOK_PATH: &str = "/github-webhook";
/// Default backend name used by rule targets that don't name one.
pub const DEFAULT_BACKEND: &str = "onebot";
/// Default per-request timeout for bot backends, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Target types understood by OneBot backends.
pub const TARGET_TYPES: [&str; 2] = ["group", "private"];

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Named bot backends.
    pub backends: Vec<BackendSettings>,
    /// Routing rules, in match order.
    pub rules: Vec<RuleSettings>,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Route receiving repository webhooks.
    pub webhook_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// How a backend is reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Long-lived WebSocket with correlated requests.
    #[default]
    #[serde(alias = "websocket")]
    Ws,
    /// One HTTP request per message.
    Http,
}

impl Protocol {
    /// URL schemes accepted for this protocol.
    pub fn schemes(self) -> &'static [&'static str] {
        match self {
            Self::Ws => &["ws://", "wss://"],
            Self::Http => &["http://", "https://"],
        }
    }

    /// Short label, as written in settings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bot backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    /// Registry name referenced by rule targets.
    pub name: String,
    /// Transport variant.
    pub protocol: Protocol,
    /// Endpoint URL; scheme must fit `protocol`.
    pub url: String,
    /// Bearer token sent to the backend, empty for none.
    pub access_token: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Backoff for the initial connect.
    pub connect: BackoffPolicy,
    /// Backoff for recovering a dropped connection.
    #[serde(default = "BackoffPolicy::reconnect")]
    pub reconnect: BackoffPolicy,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_BACKEND.to_string(),
            protocol: Protocol::Ws,
            url: String::new(),
            access_token: String::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect: BackoffPolicy::connect(),
            reconnect: BackoffPolicy::reconnect(),
        }
    }
}

/// One routing rule as written in settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSettings {
    /// Rule name, used in logs.
    pub name: String,
    /// Repository patterns (`owner/name`, globs allowed).
    pub repos: Vec<String>,
    /// Branch patterns.
    pub branches: Vec<String>,
    /// Accepted event types.
    pub events: Vec<String>,
    /// Webhook secret; empty disables signature checks.
    pub secret: String,
    /// Apply branch filtering to branchless event types as well.
    pub branch_check_all: bool,
    /// Delivery targets.
    pub targets: Vec<TargetSettings>,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            repos: Vec::new(),
            branches: vec!["*".to_string()],
            events: ["push", "pull_request", "issues", "issue_comment", "release"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            secret: String::new(),
            branch_check_all: false,
            targets: Vec::new(),
        }
    }
}

impl RuleSettings {
    /// Convert into a core [`Rule`]. `None` when no repo pattern is set.
    pub fn to_rule(&self) -> Option<Rule> {
        let mut builder = Rule::builder(&self.name)
            .secret(self.secret.as_bytes())
            .branch_check_all(self.branch_check_all);
        for repo in &self.repos {
            builder = builder.repo(repo);
        }
        for branch in &self.branches {
            builder = builder.branch(branch);
        }
        for event in &self.events {
            builder = builder.event(event);
        }
        for target in &self.targets {
            builder = builder.destination(target.to_destination());
        }
        builder.build()
    }
}

/// A chat target within a backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSettings {
    /// Backend name; defaults to [`DEFAULT_BACKEND`].
    #[serde(default = "default_backend")]
    pub backend: String,
    /// `group` or `private`.
    #[serde(rename = "type")]
    pub target_type: String,
    /// Group or user id. Accepts JSON numbers or strings.
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: String,
}

impl TargetSettings {
    /// Convert into a core [`Destination`].
    pub fn to_destination(&self) -> Destination {
        Destination::new(&self.backend, &self.target_type, &self.id)
    }
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn id_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

impl RelaySettings {
    /// Look up a backend by name.
    pub fn backend(&self, name: &str) -> Option<&BackendSettings> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !self.server.webhook_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.webhookPath must start with '/': {}",
                self.server.webhook_path
            )));
        }

        let mut names = HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                return Err(SettingsError::InvalidValue(
                    "backend name must not be empty".into(),
                ));
            }
            if !names.insert(backend.name.as_str()) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate backend name: {}",
                    backend.name
                )));
            }
            let schemes = backend.protocol.schemes();
            if !schemes.iter().any(|s| backend.url.starts_with(s)) {
                return Err(SettingsError::InvalidValue(format!(
                    "backend {} uses protocol {} so its url must start with {}: {:?}",
                    backend.name,
                    backend.protocol,
                    schemes.join(" or "),
                    backend.url
                )));
            }
        }

        for (i, rule) in self.rules.iter().enumerate() {
            let label = if rule.name.is_empty() {
                format!("rules[{i}]")
            } else {
                rule.name.clone()
            };
            if rule.repos.iter().all(String::is_empty) {
                return Err(SettingsError::InvalidValue(format!(
                    "rule {label} needs at least one repo pattern"
                )));
            }
            for target in &rule.targets {
                if !names.contains(target.backend.as_str()) {
                    return Err(SettingsError::InvalidValue(format!(
                        "rule {label} targets unknown backend {}",
                        target.backend
                    )));
                }
                if !TARGET_TYPES.contains(&target.target_type.as_str()) {
                    return Err(SettingsError::InvalidValue(format!(
                        "rule {label} has unsupported target type {}",
                        target.target_type
                    )));
                }
            }
        }

        Ok(())
    }

    /// Build the first-match rule index from `rules`.
    pub fn rule_index(&self) -> RuleIndex {
        RuleIndex::new(self.rules.iter().filter_map(RuleSettings::to_rule).collect())
    }

    /// A starter configuration with one backend and one rule.
    pub fn sample() -> Self {
        Self {
            backends: vec![BackendSettings {
                url: "ws://127.0.0.1:3001".to_string(),
                ..BackendSettings::default()
            }],
            rules: vec![RuleSettings {
                name: "github".to_string(),
                repos: vec!["owner/repo".to_string()],
                branches: vec!["main".to_string()],
                targets: vec![TargetSettings {
                    backend: DEFAULT_BACKEND.to_string(),
                    target_type: "group".to_string(),
                    id: "123456789".to_string(),
                }],
                ..RuleSettings::default()
            }],
            ..Self::default()
        }
    }
}
