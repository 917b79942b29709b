//! Content blocks carried by prompts and streamed updates.

use serde::{Deserialize, Serialize};

/// A single piece of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain UTF-8 text.
    Text {
        /// The text.
        text: String,
    },
}

impl ContentBlock {
    /// Text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Text carried by this block.
    #[must_use]
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// Concatenate the text of every block.
#[must_use]
pub fn join_text(blocks: &[ContentBlock]) -> String {
    blocks.iter().map(ContentBlock::as_text).collect()
}
