//! Session creation and streamed session updates.

use serde::{Deserialize, Serialize};

use crate::models::content::ContentBlock;

/// `session/new` request params.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
    /// Working directory the agent should assume, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// `session/new` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    /// Opaque identifier allocated by the agent.
    pub session_id: String,
}

/// One streamed update within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// A chunk of the agent's reply.
    AgentMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// A chunk of the agent's reasoning; never part of the aggregated reply.
    AgentThoughtChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// Echo of user input replayed by the agent.
    UserMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
}

impl SessionUpdate {
    /// Reply text carried by this update, if it contributes to the response.
    #[must_use]
    pub fn reply_text(&self) -> Option<&str> {
        match self {
            Self::AgentMessageChunk { content } => Some(content.as_text()),
            Self::AgentThoughtChunk { .. } | Self::UserMessageChunk { .. } => None,
        }
    }
}

/// `session/update` notification params.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// The update.
    pub update: SessionUpdate,
}
