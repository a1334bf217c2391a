//! HTTP routes: webhook ingress and health.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::response::Json;
use axum::routing::{get, post};
use hookrelay_core::signature::SIGNATURE_HEADER;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::dispatch::{DeliveryReport, DeliveryStatus, Dispatcher, Outcome};
use crate::errors::{DispatchError, IngressError};
use crate::github::{self, DELIVERY_HEADER, EVENT_HEADER};
use crate::health::{self, HealthResponse};

/// GitHub caps webhook payloads at 25 MB.
pub const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// When the server started.
    pub start_time: Instant,
}

impl AppState {
    /// State whose uptime starts now.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            start_time: Instant::now(),
        }
    }
}

/// Webhook response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    /// Delivered everywhere (or a ping was answered).
    Success,
    /// Accepted but not forwarded.
    Ignored,
    /// Delivered to some destinations only.
    Partial,
    /// Rejected or undeliverable.
    Error,
}

/// JSON body returned by the webhook route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Outcome class.
    pub status: WebhookStatus,
    /// Human-readable detail.
    pub message: String,
}

impl WebhookResponse {
    fn new(status: WebhookStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A `success` response.
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(WebhookStatus::Success, message)
    }

    /// An `ignored` response.
    pub fn ignored(message: impl Into<String>) -> Self {
        Self::new(WebhookStatus::Ignored, message)
    }

    /// An `error` response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(WebhookStatus::Error, message)
    }
}

/// Build the router: `POST {webhook_path}` and `GET /health`.
pub fn router(state: AppState, webhook_path: &str) -> Router {
    Router::new()
        .route(webhook_path, post(webhook_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let rules = state.dispatcher.rules().load().len();
    let backends = state.dispatcher.transports().statuses();
    Json(health::health_check(state.start_time, rules, backends))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn is_json(headers: &HeaderMap) -> bool {
    header(headers, CONTENT_TYPE.as_str())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// POST {webhook_path}
async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, IngressError> {
    if !is_json(&headers) {
        debug!("rejecting non-JSON webhook");
        return Ok(Json(WebhookResponse::ignored(
            "only application/json payloads are accepted",
        )));
    }

    let Some(event_type) = header(&headers, EVENT_HEADER) else {
        debug!("webhook without event header");
        return Ok(Json(WebhookResponse::ignored(format!(
            "missing {EVENT_HEADER} header"
        ))));
    };

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| IngressError::MalformedPayload(e.to_string()))?;
    if payload.as_object().is_none_or(serde_json::Map::is_empty) {
        return Ok(Json(WebhookResponse::ignored("empty payload")));
    }

    let delivery = header(&headers, DELIVERY_HEADER).unwrap_or("-");
    info!(event = event_type, delivery, "webhook received");

    let signature = header(&headers, SIGNATURE_HEADER).map(str::to_string);
    let record = github::event_record(event_type, &payload, body.to_vec(), signature);

    match state.dispatcher.dispatch(&record, &payload).await {
        Ok(Outcome::Pong) => Ok(Json(WebhookResponse::success("pong"))),
        Ok(Outcome::Ignored(reason)) => Ok(Json(WebhookResponse::ignored(reason))),
        Ok(Outcome::Delivered(report)) => delivered(&report),
        Err(DispatchError::Signature(e)) => Err(IngressError::Unauthorized(e)),
        Err(e) => Err(IngressError::DeliveryFailed(e.to_string())),
    }
}

fn delivered(report: &DeliveryReport) -> Result<Json<WebhookResponse>, IngressError> {
    let total = report.delivered.len() + report.failed.len();
    match report.status() {
        DeliveryStatus::Success => Ok(Json(WebhookResponse::success(format!(
            "delivered to {total} destination(s)"
        )))),
        DeliveryStatus::Partial => Ok(Json(WebhookResponse::new(
            WebhookStatus::Partial,
            format!(
                "delivered to {} of {total} destination(s)",
                report.delivered.len()
            ),
        ))),
        DeliveryStatus::Failed => Err(IngressError::DeliveryFailed(format!(
            "delivery failed for all {total} destination(s)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hookrelay_core::signature::sign;
    use hookrelay_core::{Destination, Rule, RuleIndex, RuleIndexHandle};
    use hookrelay_transport::TransportRegistry;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    const PATH: &str = "/github-webhook";

    fn app(rules: Vec<Rule>) -> Router {
        let dispatcher = Dispatcher::new(
            RuleIndexHandle::new(RuleIndex::new(rules)),
            Arc::new(TransportRegistry::new()),
        );
        router(AppState::new(Arc::new(dispatcher)), PATH)
    }

    fn secured_rule() -> Rule {
        Rule::builder("r")
            .repo("octo/repo")
            .branch("main")
            .secret("s3cret")
            .event("push")
            .destination(Destination::new("missing", "group", "1"))
            .build()
            .unwrap()
    }

    fn webhook(event: &str) -> axum::http::request::Builder {
        Request::builder()
            .method("POST")
            .uri(PATH)
            .header("content-type", "application/json")
            .header(EVENT_HEADER, event)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(request).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_rules() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = send(app(vec![secured_rule()]), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["rules"], 1);
        assert_eq!(json["backends"], json!([]));
    }

    #[tokio::test]
    async fn non_json_content_type_ignored() {
        let req = Request::builder()
            .method("POST")
            .uri(PATH)
            .header("content-type", "application/x-www-form-urlencoded")
            .header(EVENT_HEADER, "push")
            .body(Body::from("payload=%7B%7D"))
            .unwrap();
        let (status, json) = send(app(vec![]), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ignored");
    }

    #[tokio::test]
    async fn charset_parameter_accepted() {
        let req = Request::builder()
            .method("POST")
            .uri(PATH)
            .header("content-type", "application/json; charset=utf-8")
            .header(EVENT_HEADER, "push")
            .body(Body::from(r#"{"repository":{"full_name":"a/b"}}"#))
            .unwrap();
        let (_, json) = send(app(vec![]), req).await;
        assert_eq!(json["message"], "no rule for repository");
    }

    #[tokio::test]
    async fn missing_event_header_ignored() {
        let req = Request::builder()
            .method("POST")
            .uri(PATH)
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, json) = send(app(vec![]), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ignored");
        assert_eq!(json["message"], "missing X-GitHub-Event header");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let req = webhook("push").body(Body::from("{not json")).unwrap();
        let (status, json) = send(app(vec![]), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn empty_payload_ignored() {
        let req = webhook("push").body(Body::from("{}")).unwrap();
        let (_, json) = send(app(vec![]), req).await;
        assert_eq!(json["message"], "empty payload");
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let body = r#"{"ref":"refs/heads/main","repository":{"full_name":"octo/repo"}}"#;
        let req = webhook("push")
            .header(SIGNATURE_HEADER, sign(body.as_bytes(), b"wrong"))
            .body(Body::from(body))
            .unwrap();
        let (status, json) = send(app(vec![secured_rule()]), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn ping_answered() {
        let body = r#"{"zen":"Keep it simple.","repository":{"full_name":"octo/repo"}}"#;
        let req = webhook("ping")
            .header(SIGNATURE_HEADER, sign(body.as_bytes(), b"s3cret"))
            .body(Body::from(body))
            .unwrap();
        let (status, json) = send(app(vec![secured_rule()]), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"status": "success", "message": "pong"}));
    }

    #[tokio::test]
    async fn undeliverable_is_bad_gateway() {
        let body = r#"{"ref":"refs/heads/main","repository":{"full_name":"octo/repo"}}"#;
        let req = webhook("push")
            .header(SIGNATURE_HEADER, sign(body.as_bytes(), b"s3cret"))
            .body(Body::from(body))
            .unwrap();
        let (status, json) = send(app(vec![secured_rule()]), req).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["message"], "delivery failed for all 1 destination(s)");
    }

    #[tokio::test]
    async fn unmatched_event_ignored() {
        let body = r#"{"action":"opened","repository":{"full_name":"octo/repo"}}"#;
        let req = webhook("issues")
            .header(SIGNATURE_HEADER, sign(body.as_bytes(), b"s3cret"))
            .body(Body::from(body))
            .unwrap();
        let (status, json) = send(app(vec![secured_rule()]), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ignored");
        assert_eq!(json["message"], "no matching rule");
    }

    #[test]
    fn partial_report_response() {
        let report = DeliveryReport {
            rule: "r".into(),
            delivered: vec![Destination::new("a", "group", "1")],
            failed: vec![crate::dispatch::FailedDelivery {
                destination: Destination::new("b", "group", "2"),
                error: "down".into(),
            }],
        };
        let Json(resp) = delivered(&report).unwrap();
        assert_eq!(resp.status, WebhookStatus::Partial);
        assert_eq!(resp.message, "delivered to 1 of 2 destination(s)");
    }
}
