//! Server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use hookrelay_core::SignatureError;
use hookrelay_settings::SettingsError;

use crate::routes::WebhookResponse;

/// Errors raised while dispatching an accepted event.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The signature header did not authenticate the body.
    #[error("signature rejected: {0}")]
    Signature(#[from] SignatureError),

    /// Reloading rules from disk failed.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// No settings file is attached, so rules cannot be reloaded.
    #[error("no settings file to reload from")]
    NoSettingsPath,
}

/// Errors surfaced to the webhook caller as a non-200 response.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// The body is not valid JSON.
    #[error("malformed JSON payload: {0}")]
    MalformedPayload(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    Unauthorized(SignatureError),

    /// Every destination failed.
    #[error("{0}")]
    DeliveryFailed(String),
}

impl IngressError {
    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(WebhookResponse::error(self.to_string()))).into_response()
    }
}

/// Convenience alias for dispatcher results.
pub type Result<T> = std::result::Result<T, DispatchError>;
