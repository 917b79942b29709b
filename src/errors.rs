//! Error types shared across the harness.
//!
//! Every failure mode of the framing, connection, routing, and process
//! layers is a variant of [`AppError`]. Errors that cross the process
//! boundary travel as an [`RpcError`] and are rebuilt into the same variant
//! on the receiving side.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Shared harness result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Harness error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Inbound bytes could not be parsed as a complete message.
    Framing(String),
    /// Stream write or read failure.
    Transport(String),
    /// Peer stream closed or process exited.
    ConnectionClosed(String),
    /// Unmatched/duplicate response, unknown method, or malformed params.
    ProtocolViolation(String),
    /// Referenced session does not exist.
    SessionNotFound(String),
    /// A prompt arrived before any prompt handler was configured.
    HandlerNotConfigured(String),
    /// A single-slot resource already has an outstanding user.
    ResourceBusy(String),
    /// Stubbed capability invoked.
    NotImplemented(String),
    /// A request handler failed or panicked.
    Handler(String),
    /// An externally supplied deadline elapsed.
    Timeout(String),
    /// Child process spawn or teardown failure.
    Process(String),
    /// A scripted scenario step observed an unexpected response.
    Expectation(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Framing(msg) => write!(f, "framing: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::HandlerNotConfigured(msg) => write!(f, "handler not configured: {msg}"),
            Self::ResourceBusy(msg) => write!(f, "resource busy: {msg}"),
            Self::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Expectation(msg) => write!(f, "expectation failed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Error payload carried by a failed response on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Stable snake-case error code (e.g. `session_not_found`).
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl AppError {
    /// Stable wire code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Framing(_) => "framing",
            Self::Transport(_) => "transport",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::SessionNotFound(_) => "session_not_found",
            Self::HandlerNotConfigured(_) => "handler_not_configured",
            Self::ResourceBusy(_) => "resource_busy",
            Self::NotImplemented(_) => "not_implemented",
            Self::Handler(_) => "handler",
            Self::Timeout(_) => "timeout",
            Self::Process(_) => "process",
            Self::Expectation(_) => "expectation",
            Self::Io(_) => "io",
        }
    }

    /// Detail message without the kind prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Framing(msg)
            | Self::Transport(msg)
            | Self::ConnectionClosed(msg)
            | Self::ProtocolViolation(msg)
            | Self::SessionNotFound(msg)
            | Self::HandlerNotConfigured(msg)
            | Self::ResourceBusy(msg)
            | Self::NotImplemented(msg)
            | Self::Handler(msg)
            | Self::Timeout(msg)
            | Self::Process(msg)
            | Self::Expectation(msg)
            | Self::Io(msg) => msg,
        }
    }
}

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code().to_owned(),
            message: err.detail().to_owned(),
        }
    }
}

impl From<RpcError> for AppError {
    /// Rebuild the peer's error kind; unknown codes become [`AppError::Handler`].
    fn from(err: RpcError) -> Self {
        let RpcError { code, message } = err;
        match code.as_str() {
            "config" => Self::Config(message),
            "framing" => Self::Framing(message),
            "transport" => Self::Transport(message),
            "connection_closed" => Self::ConnectionClosed(message),
            "protocol_violation" => Self::ProtocolViolation(message),
            "session_not_found" => Self::SessionNotFound(message),
            "handler_not_configured" => Self::HandlerNotConfigured(message),
            "resource_busy" => Self::ResourceBusy(message),
            "not_implemented" => Self::NotImplemented(message),
            "handler" => Self::Handler(message),
            "timeout" => Self::Timeout(message),
            "process" => Self::Process(message),
            "expectation" => Self::Expectation(message),
            "io" => Self::Io(message),
            _ => Self::Handler(format!("{code}: {message}")),
        }
    }
}
