//! `session/request_permission` payloads.

use serde::{Deserialize, Serialize};

/// Semantics of a permission option.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this one operation.
    AllowOnce,
    /// Allow this and future operations of the same kind.
    AllowAlways,
    /// Reject this one operation.
    RejectOnce,
    /// Reject this and future operations of the same kind.
    RejectAlways,
}

impl PermissionOptionKind {
    /// Whether choosing this option grants permission.
    #[must_use]
    pub fn is_allow(self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowAlways)
    }
}

/// One choice offered to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Identifier echoed back when selected.
    pub option_id: String,
    /// Display label.
    pub name: String,
    /// Option semantics.
    pub kind: PermissionOptionKind,
}

/// The operation permission is requested for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRef {
    /// Agent-local tool call identifier.
    pub tool_call_id: String,
    /// Human-readable summary.
    pub title: String,
}

/// `session/request_permission` request params.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionRequest {
    /// Session the operation belongs to.
    pub session_id: String,
    /// Operation awaiting permission.
    pub tool_call: ToolCallRef,
    /// Choices, in the agent's preferred order.
    pub options: Vec<PermissionOption>,
}

/// Client decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// No option chosen.
    Cancelled,
    /// The option with this identifier was chosen.
    #[serde(rename_all = "camelCase")]
    Selected {
        /// Chosen option.
        option_id: String,
    },
}

/// `session/request_permission` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionResponse {
    /// Client decision.
    pub outcome: PermissionOutcome,
}
