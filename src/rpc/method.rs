//! Closed catalogue of protocol methods and the role that serves each one.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::AppError;

/// One of the two protocol participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Drives sessions and sends prompts; serves permission, fs, terminal.
    Client,
    /// Consumes prompts and streams updates back.
    Agent,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Agent => f.write_str("agent"),
        }
    }
}

/// Whether a method is called with a reply or sent one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Expects exactly one response.
    Request,
    /// Fire-and-forget.
    Notification,
}

/// Every method the harness understands.
///
/// | Wire name                    | Served by | Kind         |
/// |------------------------------|-----------|--------------|
/// | `initialize`                 | agent     | request      |
/// | `session/new`                | agent     | request      |
/// | `session/prompt`             | agent     | request      |
/// | `session/cancel`             | agent     | notification |
/// | `session/update`             | client    | notification |
/// | `session/request_permission` | client    | request      |
/// | `fs/read_text_file`          | client    | request      |
/// | `fs/write_text_file`         | client    | request      |
/// | `terminal/create`            | client    | request      |
/// | `terminal/output`            | client    | request      |
/// | `terminal/release`           | client    | request      |
/// | `terminal/wait_for_exit`     | client    | request      |
/// | `terminal/kill`              | client    | request      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `initialize`
    Initialize,
    /// `session/new`
    NewSession,
    /// `session/prompt`
    Prompt,
    /// `session/cancel`
    Cancel,
    /// `session/update`
    SessionUpdate,
    /// `session/request_permission`
    RequestPermission,
    /// `fs/read_text_file`
    ReadTextFile,
    /// `fs/write_text_file`
    WriteTextFile,
    /// `terminal/create`
    CreateTerminal,
    /// `terminal/output`
    TerminalOutput,
    /// `terminal/release`
    ReleaseTerminal,
    /// `terminal/wait_for_exit`
    WaitForTerminalExit,
    /// `terminal/kill`
    KillTerminal,
}

impl Method {
    /// All methods, in catalogue order.
    pub const ALL: [Self; 13] = [
        Self::Initialize,
        Self::NewSession,
        Self::Prompt,
        Self::Cancel,
        Self::SessionUpdate,
        Self::RequestPermission,
        Self::ReadTextFile,
        Self::WriteTextFile,
        Self::CreateTerminal,
        Self::TerminalOutput,
        Self::ReleaseTerminal,
        Self::WaitForTerminalExit,
        Self::KillTerminal,
    ];

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::NewSession => "session/new",
            Self::Prompt => "session/prompt",
            Self::Cancel => "session/cancel",
            Self::SessionUpdate => "session/update",
            Self::RequestPermission => "session/request_permission",
            Self::ReadTextFile => "fs/read_text_file",
            Self::WriteTextFile => "fs/write_text_file",
            Self::CreateTerminal => "terminal/create",
            Self::TerminalOutput => "terminal/output",
            Self::ReleaseTerminal => "terminal/release",
            Self::WaitForTerminalExit => "terminal/wait_for_exit",
            Self::KillTerminal => "terminal/kill",
        }
    }

    /// The role whose inbound method set contains this method.
    #[must_use]
    pub fn served_by(self) -> Role {
        match self {
            Self::Initialize | Self::NewSession | Self::Prompt | Self::Cancel => Role::Agent,
            _ => Role::Client,
        }
    }

    /// Request or notification.
    #[must_use]
    pub fn call_kind(self) -> CallKind {
        match self {
            Self::Cancel | Self::SessionUpdate => CallKind::Notification,
            _ => CallKind::Request,
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AppError::ProtocolViolation(format!("unknown method '{s}'")))
    }
}
