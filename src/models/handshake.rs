//! `initialize` exchange payloads.

use serde::{Deserialize, Serialize};

/// Protocol version spoken by both mock roles.
pub const PROTOCOL_VERSION: u32 = 1;

/// Name and version of a protocol participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Implementation {
    /// Participant name.
    pub name: String,
    /// Participant version.
    pub version: String,
}

impl Implementation {
    /// This crate, under the given participant name.
    #[must_use]
    pub fn this_crate(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// `initialize` request params.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Version the client speaks.
    pub protocol_version: u32,
    /// Client identification.
    pub client_info: Implementation,
}

/// `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// Version the agent speaks.
    pub protocol_version: u32,
    /// Agent identification.
    pub agent_info: Implementation,
}
