//! Prompt turn payloads.

use serde::{Deserialize, Serialize};

use crate::models::content::{join_text, ContentBlock};

/// `session/prompt` request params.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Target session.
    pub session_id: String,
    /// User message.
    pub prompt: Vec<ContentBlock>,
}

impl PromptRequest {
    /// Single-text-block prompt.
    #[must_use]
    pub fn text(session_id: &str, text: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            prompt: vec![ContentBlock::text(text)],
        }
    }

    /// Prompt text with all blocks concatenated.
    #[must_use]
    pub fn joined_text(&self) -> String {
        join_text(&self.prompt)
    }
}

/// Why a prompt turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The turn completed normally.
    EndTurn,
    /// The client cancelled the turn.
    Cancelled,
    /// The agent declined to continue (e.g. permission rejected).
    Refusal,
}

/// `session/prompt` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    /// Why the turn ended.
    pub stop_reason: StopReason,
}

/// `session/cancel` notification params.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancelNotification {
    /// Session whose turn should stop.
    pub session_id: String,
}
