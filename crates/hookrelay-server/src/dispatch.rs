//! Event dispatch: authenticate, route, format, deliver.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use hookrelay_core::{Destination, EventRecord, Rule, RuleIndexHandle, verify_signature};
use hookrelay_settings::load_settings_from_path;
use hookrelay_transport::{OneBotRequest, TransportRegistry};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::errors::{DispatchError, Result};
use crate::format;

/// Event GitHub sends when a webhook is first installed.
pub const PING_EVENT: &str = "ping";

/// A destination that could not be reached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedDelivery {
    /// Where delivery was attempted.
    pub destination: Destination,
    /// Why it failed.
    pub error: String,
}

/// Overall result of delivering to every destination of a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Every destination accepted the message.
    Success,
    /// Some destinations failed.
    Partial,
    /// Every destination failed.
    Failed,
}

/// Per-destination outcome of one dispatched event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Name of the matched rule.
    pub rule: String,
    /// Destinations that accepted the message.
    pub delivered: Vec<Destination>,
    /// Destinations that did not.
    pub failed: Vec<FailedDelivery>,
}

impl DeliveryReport {
    /// Summarize the report. A rule without destinations counts as success.
    pub fn status(&self) -> DeliveryStatus {
        match (self.delivered.is_empty(), self.failed.is_empty()) {
            (_, true) => DeliveryStatus::Success,
            (false, false) => DeliveryStatus::Partial,
            (true, false) => DeliveryStatus::Failed,
        }
    }
}

/// What happened to an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A `ping` was authenticated.
    Pong,
    /// The event was dropped without delivery.
    Ignored(String),
    /// The event was delivered (possibly partially).
    Delivered(DeliveryReport),
}

/// Routes authenticated events to bot transports.
pub struct Dispatcher {
    rules: RuleIndexHandle,
    transports: Arc<TransportRegistry>,
    settings_path: Option<PathBuf>,
}

impl Dispatcher {
    /// Create a dispatcher over a live rule index and transport registry.
    pub fn new(rules: RuleIndexHandle, transports: Arc<TransportRegistry>) -> Self {
        Self {
            rules,
            transports,
            settings_path: None,
        }
    }

    /// Attach the settings file that [`Dispatcher::reload_rules`] reads.
    #[must_use]
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// The live rule index.
    pub fn rules(&self) -> &RuleIndexHandle {
        &self.rules
    }

    /// The transport registry.
    pub fn transports(&self) -> &Arc<TransportRegistry> {
        &self.transports
    }

    /// Authenticate, route and deliver one event.
    ///
    /// The signature is checked against the secret of the first rule whose
    /// repository patterns match, before event and branch filters apply.
    /// Events for repositories no rule mentions are ignored unverified.
    pub async fn dispatch(&self, record: &EventRecord, payload: &Value) -> Result<Outcome> {
        let index = self.rules.load();

        let Some(owner) = index.rule_for_repo(&record.repo_full_name) else {
            info!(repo = %record.repo_full_name, event = %record.event_type, "no rule for repository");
            return Ok(Outcome::Ignored("no rule for repository".into()));
        };

        if owner.secret().is_empty() {
            warn!(rule = owner.name(), "rule has no secret, skipping signature verification");
        }
        verify_signature(
            &record.raw_body,
            record.signature_header.as_deref(),
            owner.secret(),
        )
        .inspect_err(|e| {
            warn!(repo = %record.repo_full_name, rule = owner.name(), error = %e, "signature rejected");
        })?;

        if record.event_type == PING_EVENT {
            info!(repo = %record.repo_full_name, "webhook ping");
            return Ok(Outcome::Pong);
        }

        let Some(rule) = index.resolve(&record.repo_full_name, record.branch(), &record.event_type)
        else {
            info!(
                repo = %record.repo_full_name,
                branch = ?record.branch(),
                event = %record.event_type,
                "no matching rule"
            );
            return Ok(Outcome::Ignored("no matching rule".into()));
        };

        let message = format::render(&record.event_type, payload).segments();
        let report = self.deliver(rule, &message).await;
        info!(
            rule = %report.rule,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "event dispatched"
        );
        Ok(Outcome::Delivered(report))
    }

    /// Send `message` to every destination of `rule` concurrently.
    pub async fn deliver(&self, rule: &Rule, message: &Value) -> DeliveryReport {
        let attempts = rule
            .destinations()
            .iter()
            .map(|destination| self.deliver_one(destination, message));
        let results = join_all(attempts).await;

        let mut report = DeliveryReport {
            rule: rule.name().to_string(),
            ..DeliveryReport::default()
        };
        for (destination, result) in rule.destinations().iter().zip(results) {
            match result {
                Ok(()) => report.delivered.push(destination.clone()),
                Err(error) => report.failed.push(FailedDelivery {
                    destination: destination.clone(),
                    error,
                }),
            }
        }
        report
    }

    async fn deliver_one(
        &self,
        destination: &Destination,
        message: &Value,
    ) -> std::result::Result<(), String> {
        let Some(transport) = self.transports.get(&destination.transport) else {
            warn!(%destination, "unknown transport");
            return Err(format!("unknown transport: {}", destination.transport));
        };

        let request = OneBotRequest::send_msg(
            &destination.target_type,
            &destination.target_id,
            message.clone(),
            false,
        )
        .map_err(|e| e.to_string())?;

        match transport.send_default(request).await {
            Ok(response) if response.is_ok() => {
                debug!(%destination, "delivered");
                Ok(())
            }
            Ok(response) => {
                warn!(
                    %destination,
                    status = %response.status,
                    retcode = ?response.retcode,
                    message = %response.message,
                    "endpoint rejected message"
                );
                let retcode = response
                    .retcode
                    .map_or_else(|| "none".to_string(), |code| code.to_string());
                Err(format!(
                    "endpoint rejected message: status {} retcode {retcode}",
                    response.status
                ))
            }
            Err(e) => {
                error!(%destination, error = %e, "delivery failed");
                Err(e.to_string())
            }
        }
    }

    /// Re-read the settings file and swap in its rules.
    ///
    /// Backends are not rebuilt; rules that target a backend missing from
    /// the running registry fail at delivery time. In-flight dispatches
    /// finish against the index they started with.
    pub fn reload_rules(&self) -> Result<usize> {
        let path = self.settings_path.as_ref().ok_or(DispatchError::NoSettingsPath)?;
        let settings = load_settings_from_path(path)?;
        let index = settings.rule_index();
        let count = index.len();
        let _ = self.rules.swap(index);
        info!(path = %path.display(), rules = count, "rules reloaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use hookrelay_core::signature::sign;
    use hookrelay_core::{RuleIndex, SignatureError};
    use hookrelay_transport::{BotTransport, OneBotResponse, TransportError, TransportKind};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    struct RecordingTransport {
        name: String,
        reply: OneBotResponse,
        fail: bool,
        sent: Mutex<Vec<OneBotRequest>>,
    }

    impl RecordingTransport {
        fn ok(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                reply: OneBotResponse {
                    status: "ok".into(),
                    ..OneBotResponse::default()
                },
                fail: false,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn rejecting(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                reply: OneBotResponse {
                    status: "failed".into(),
                    retcode: Some(100),
                    ..OneBotResponse::default()
                },
                fail: false,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn broken(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                reply: OneBotResponse::default(),
                fail: true,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BotTransport for RecordingTransport {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> TransportKind {
            TransportKind::Http
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn default_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
        async fn send(
            &self,
            request: OneBotRequest,
            _timeout: Duration,
        ) -> hookrelay_transport::Result<OneBotResponse> {
            self.sent.lock().push(request);
            if self.fail {
                return Err(TransportError::NotConnected { name: self.name.clone() });
            }
            Ok(self.reply.clone())
        }
        async fn close(&self) {}
    }

    fn rule(secret: &str, destinations: &[(&str, &str, &str)]) -> Rule {
        let mut builder = Rule::builder("r")
            .repo("octo/*")
            .branch("main")
            .event("push")
            .secret(secret);
        for (t, ty, id) in destinations {
            builder = builder.destination(Destination::new(*t, *ty, *id));
        }
        builder.build().unwrap()
    }

    async fn dispatcher(rules: Vec<Rule>, transports: Vec<Arc<RecordingTransport>>) -> Dispatcher {
        let registry = TransportRegistry::new();
        for t in transports {
            registry.register(t, false).await.unwrap();
        }
        Dispatcher::new(
            RuleIndexHandle::new(RuleIndex::new(rules)),
            Arc::new(registry),
        )
    }

    fn push_record(body: &[u8], signature: Option<String>) -> EventRecord {
        EventRecord {
            event_type: "push".into(),
            repo_full_name: "octo/repo".into(),
            branch: Some("main".into()),
            raw_body: body.to_vec(),
            signature_header: signature,
        }
    }

    #[tokio::test]
    async fn delivers_to_every_destination() {
        let bot = RecordingTransport::ok("bot");
        let d = dispatcher(
            vec![rule("", &[("bot", "group", "1"), ("bot", "private", "2")])],
            vec![bot.clone()],
        )
        .await;

        let outcome = d.dispatch(&push_record(b"{}", None), &json!({})).await.unwrap();
        let report = assert_matches!(outcome, Outcome::Delivered(r) => r);
        assert_eq!(report.status(), DeliveryStatus::Success);
        assert_eq!(report.delivered.len(), 2);

        let sent = bot.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].params["group_id"], 1);
        assert_eq!(sent[1].params["user_id"], 2);
    }

    #[tokio::test]
    async fn valid_signature_accepted() {
        let bot = RecordingTransport::ok("bot");
        let d = dispatcher(vec![rule("s3cret", &[("bot", "group", "1")])], vec![bot]).await;

        let body = br#"{"ref":"refs/heads/main"}"#;
        let record = push_record(body, Some(sign(body, b"s3cret")));
        let outcome = d.dispatch(&record, &json!({})).await.unwrap();
        assert_matches!(outcome, Outcome::Delivered(_));
    }

    #[tokio::test]
    async fn bad_signature_rejected_before_delivery() {
        let bot = RecordingTransport::ok("bot");
        let d = dispatcher(vec![rule("s3cret", &[("bot", "group", "1")])], vec![bot.clone()]).await;

        let record = push_record(b"{}", Some(sign(b"{}", b"other")));
        let err = d.dispatch(&record, &json!({})).await.unwrap_err();
        assert_matches!(err, DispatchError::Signature(SignatureError::Mismatch));

        let err = d.dispatch(&push_record(b"{}", None), &json!({})).await.unwrap_err();
        assert_matches!(err, DispatchError::Signature(SignatureError::MissingHeader));
        assert!(bot.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn secret_comes_from_first_repo_rule() {
        // The first rule owns the secret even though only the second routes.
        let first = Rule::builder("issues-only")
            .repo("octo/repo")
            .event("issues")
            .secret("first")
            .build()
            .unwrap();
        let second = rule("second", &[("bot", "group", "1")]);
        let d = dispatcher(vec![first, second], vec![RecordingTransport::ok("bot")]).await;

        let record = push_record(b"{}", Some(sign(b"{}", b"second")));
        assert!(d.dispatch(&record, &json!({})).await.is_err());

        let record = push_record(b"{}", Some(sign(b"{}", b"first")));
        let outcome = d.dispatch(&record, &json!({})).await.unwrap();
        let report = assert_matches!(outcome, Outcome::Delivered(r) => r);
        assert_eq!(report.rule, "r");
    }

    #[tokio::test]
    async fn unknown_repository_ignored() {
        let d = dispatcher(vec![rule("s", &[])], vec![]).await;
        let record = EventRecord {
            repo_full_name: "someone/else".into(),
            ..push_record(b"{}", None)
        };
        let outcome = d.dispatch(&record, &json!({})).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored("no rule for repository".into()));
    }

    #[tokio::test]
    async fn unmatched_branch_ignored() {
        let d = dispatcher(vec![rule("", &[])], vec![]).await;
        let record = EventRecord {
            branch: Some("dev".into()),
            ..push_record(b"{}", None)
        };
        let outcome = d.dispatch(&record, &json!({})).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored("no matching rule".into()));
    }

    #[tokio::test]
    async fn ping_is_authenticated_then_answered() {
        let bot = RecordingTransport::ok("bot");
        let d = dispatcher(vec![rule("s", &[("bot", "group", "1")])], vec![bot.clone()]).await;

        let ping = EventRecord {
            event_type: PING_EVENT.into(),
            branch: None,
            ..push_record(b"{}", Some(sign(b"{}", b"s")))
        };
        assert_eq!(d.dispatch(&ping, &json!({})).await.unwrap(), Outcome::Pong);
        assert!(bot.sent.lock().is_empty());

        let forged = EventRecord {
            signature_header: Some(sign(b"{}", b"x")),
            ..ping
        };
        assert!(d.dispatch(&forged, &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn partial_and_failed_reports() {
        let d = dispatcher(
            vec![],
            vec![
                RecordingTransport::ok("good"),
                RecordingTransport::rejecting("picky"),
                RecordingTransport::broken("down"),
            ],
        )
        .await;
        let message = json!("hi");

        let mixed = rule(
            "",
            &[("good", "group", "1"), ("picky", "group", "2"), ("missing", "group", "3")],
        );
        let report = d.deliver(&mixed, &message).await;
        assert_eq!(report.status(), DeliveryStatus::Partial);
        assert_eq!(report.delivered, [Destination::new("good", "group", "1")]);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].error.contains("retcode 100"));
        assert!(report.failed[1].error.contains("unknown transport"));

        let dead = rule("", &[("down", "group", "1"), ("good", "channel", "2")]);
        let report = d.deliver(&dead, &message).await;
        assert_eq!(report.status(), DeliveryStatus::Failed);
        assert!(report.failed[1].error.contains("channel"));
    }

    #[test]
    fn empty_report_is_success() {
        assert_eq!(DeliveryReport::default().status(), DeliveryStatus::Success);
    }

    #[test]
    fn reload_without_path_fails() {
        let d = Dispatcher::new(RuleIndexHandle::default(), Arc::new(TransportRegistry::new()));
        assert_matches!(d.reload_rules(), Err(DispatchError::NoSettingsPath));
    }

    #[test]
    fn reload_swaps_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookrelay.json");
        std::fs::write(
            &path,
            r#"{
                "backends": [{"name": "bot", "protocol": "http", "url": "http://127.0.0.1:5700"}],
                "rules": [
                    {"name": "a", "repos": ["octo/a"], "targets": [{"backend": "bot", "type": "group", "id": 1}]},
                    {"name": "b", "repos": ["octo/b"]}
                ]
            }"#,
        )
        .unwrap();

        let d = Dispatcher::new(RuleIndexHandle::default(), Arc::new(TransportRegistry::new()))
            .with_settings_path(&path);
        assert!(d.rules().load().is_empty());
        assert_eq!(d.reload_rules().unwrap(), 2);
        assert!(d.rules().load().rule_for_repo("octo/b").is_some());

        std::fs::write(&path, "not json").unwrap();
        assert_matches!(d.reload_rules(), Err(DispatchError::Settings(_)));
        assert_eq!(d.rules().load().len(), 2);
    }
}
