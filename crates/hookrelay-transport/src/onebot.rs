//! OneBot v11 request and response frames.
//!
//! Only the parts of the protocol the relay uses: the `send_msg` action and
//! the generic response envelope.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::TransportError;

/// Action name for sending a message.
pub const SEND_MSG: &str = "send_msg";

/// An action request. `echo` is filled in by the persistent transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OneBotRequest {
    /// Action name, e.g. `send_msg`.
    pub action: String,
    /// Action parameters.
    pub params: Value,
    /// Correlation token echoed back by the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

impl OneBotRequest {
    /// Build a request for `action`.
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self {
            action: action.into(),
            params,
            echo: None,
        }
    }

    /// Build a `send_msg` request.
    ///
    /// `message` is a segment array or a plain string. Numeric ids are sent
    /// as JSON numbers.
    pub fn send_msg(
        target_type: &str,
        target_id: &str,
        message: Value,
        auto_escape: bool,
    ) -> Result<Self, TransportError> {
        let message_type: MessageType = target_type.parse()?;
        let mut params = json!({
            "message_type": message_type.as_str(),
            "message": message,
            "auto_escape": auto_escape,
        });
        if let Some(map) = params.as_object_mut() {
            let _ = map.insert(message_type.id_field().to_string(), id_value(target_id));
        }
        Ok(Self::new(SEND_MSG, params))
    }
}

/// Message routing kind for `send_msg`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Group chat.
    Group,
    /// Direct message to a user.
    Private,
}

impl MessageType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Private => "private",
        }
    }

    /// Param carrying the target id.
    pub fn id_field(self) -> &'static str {
        match self {
            Self::Group => "group_id",
            Self::Private => "user_id",
        }
    }
}

impl FromStr for MessageType {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(Self::Group),
            "private" => Ok(Self::Private),
            other => Err(TransportError::UnsupportedTarget {
                target_type: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn id_value(id: &str) -> Value {
    id.parse::<i64>()
        .map_or_else(|_| Value::String(id.to_string()), Value::from)
}

/// One `text` segment.
pub fn text_segment(text: &str) -> Value {
    json!({ "type": "text", "data": { "text": text } })
}

/// A message made of a single text segment.
pub fn text_message(text: &str) -> Value {
    Value::Array(vec![text_segment(text)])
}

/// Response envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneBotResponse {
    /// `ok`, `async` or `failed`.
    pub status: String,
    /// `0` on success; absent when the endpoint omits it.
    pub retcode: Option<i64>,
    /// Action-specific payload.
    pub data: Value,
    /// Error description, when the endpoint provides one.
    #[serde(alias = "msg")]
    pub message: String,
    /// Echoed correlation token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

impl OneBotResponse {
    /// Whether the endpoint accepted the action: status `ok` or `async`
    /// (queued), or retcode `0` whatever the status says.
    pub fn is_ok(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "async") || self.retcode == Some(0)
    }
}
