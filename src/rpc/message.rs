//! Protocol message model and its wire envelope.
//!
//! A [`Message`] is exactly one of request, response, or notification. On the
//! wire each message is a single JSON object discriminated by `kind`:
//!
//! ```json
//! {"kind":"request","id":1,"method":"session/prompt","payload":{...}}
//! {"kind":"response","id":1,"result":{...}}
//! {"kind":"response","id":1,"error":{"code":"session_not_found","message":"..."}}
//! {"kind":"notification","method":"session/update","payload":{...}}
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::RpcError;
use crate::{AppError, Result};

/// Correlation identifier linking a request to its response.
pub type RequestId = u64;

/// A single protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call expecting exactly one correlated [`Message::Response`].
    Request {
        /// Connection-unique correlation identifier.
        id: RequestId,
        /// Wire method name.
        method: String,
        /// Method-specific parameters.
        payload: Value,
    },
    /// The single reply to a request.
    Response {
        /// Identifier of the originating request.
        id: RequestId,
        /// Result payload or error payload.
        outcome: std::result::Result<Value, RpcError>,
    },
    /// A one-way message; no reply is produced.
    Notification {
        /// Wire method name.
        method: String,
        /// Method-specific parameters.
        payload: Value,
    },
}

impl Message {
    /// Short label for logging.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request { .. } => MessageKind::Request,
            Self::Response { .. } => MessageKind::Response,
            Self::Notification { .. } => MessageKind::Notification,
        }
    }

    /// Serialise to a compact single-line JSON string (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Framing`] if serialisation fails.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(&Envelope::from(self))
            .map_err(|e| AppError::Framing(format!("failed to serialise message: {e}")))
    }

    /// Parse one line (without its delimiter) into a message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Framing`] if the line is not valid JSON or is not a
    /// well-formed envelope for its `kind`.
    pub fn from_line(line: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(line)
            .map_err(|e| AppError::Framing(format!("malformed json: {e}")))?;
        Self::try_from(envelope)
    }
}

/// Message discriminator as it appears in the `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// `request`
    Request,
    /// `response`
    Response,
    /// `notification`
    Notification,
}

// ── Wire envelope ─────────────────────────────────────────────────────────────

/// Flat wire record; validated into a [`Message`] on decode.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    payload: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// Distinguish an explicit `null` (present) from an absent field.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl From<&Message> for Envelope {
    fn from(msg: &Message) -> Self {
        match msg {
            Message::Request {
                id,
                method,
                payload,
            } => Self {
                kind: MessageKind::Request,
                id: Some(*id),
                method: Some(method.clone()),
                payload: Some(payload.clone()),
                result: None,
                error: None,
            },
            Message::Response { id, outcome } => {
                let (result, error) = match outcome {
                    Ok(value) => (Some(value.clone()), None),
                    Err(err) => (None, Some(err.clone())),
                };
                Self {
                    kind: MessageKind::Response,
                    id: Some(*id),
                    method: None,
                    payload: None,
                    result,
                    error,
                }
            }
            Message::Notification { method, payload } => Self {
                kind: MessageKind::Notification,
                id: None,
                method: Some(method.clone()),
                payload: Some(payload.clone()),
                result: None,
                error: None,
            },
        }
    }
}

impl TryFrom<Envelope> for Message {
    type Error = AppError;

    fn try_from(env: Envelope) -> Result<Self> {
        match env.kind {
            MessageKind::Request => Ok(Self::Request {
                id: env
                    .id
                    .ok_or_else(|| missing("id", MessageKind::Request))?,
                method: env
                    .method
                    .ok_or_else(|| missing("method", MessageKind::Request))?,
                payload: env.payload.unwrap_or(Value::Null),
            }),
            MessageKind::Response => {
                let id = env
                    .id
                    .ok_or_else(|| missing("id", MessageKind::Response))?;
                let outcome = match (env.result, env.error) {
                    (Some(value), None) => Ok(value),
                    (None, Some(err)) => Err(err),
                    (Some(_), Some(_)) => {
                        return Err(AppError::Framing(
                            "response carries both `result` and `error`".into(),
                        ))
                    }
                    (None, None) => {
                        return Err(AppError::Framing(
                            "response carries neither `result` nor `error`".into(),
                        ))
                    }
                };
                Ok(Self::Response { id, outcome })
            }
            MessageKind::Notification => Ok(Self::Notification {
                method: env
                    .method
                    .ok_or_else(|| missing("method", MessageKind::Notification))?,
                payload: env.payload.unwrap_or(Value::Null),
            }),
        }
    }
}

fn missing(field: &str, kind: MessageKind) -> AppError {
    AppError::Framing(format!("missing required field `{field}` in {kind:?} envelope"))
}
