//! `initialize` handshake.
//!
//! After the streams are attached, the client sends `initialize` carrying its
//! protocol version and identity; the agent answers with its own. Both sides
//! must speak [`PROTOCOL_VERSION`]. The handshake is bounded by a deadline so
//! an agent that never answers cannot stall scenario startup.

use std::time::Duration;

use tracing::{debug, info};

use crate::models::handshake::{
    Implementation, InitializeRequest, InitializeResponse, PROTOCOL_VERSION,
};
use crate::rpc::connection::Connection;
use crate::rpc::handlers::{parse_params, to_payload};
use crate::rpc::method::Method;
use crate::{AppError, Result};

/// Client side: send `initialize` and validate the agent's answer.
///
/// # Errors
///
/// - [`AppError::Timeout`]: no answer within `timeout`.
/// - [`AppError::ProtocolViolation`]: malformed answer or version mismatch.
/// - Any connection failure from [`Connection::call_with_deadline`].
pub async fn initialize(
    conn: &Connection,
    client_info: Implementation,
    timeout: Duration,
) -> Result<InitializeResponse> {
    let request = InitializeRequest {
        protocol_version: PROTOCOL_VERSION,
        client_info,
    };
    debug!(conn = conn.label(), "handshake: initialize sent");

    let value = conn
        .call_with_deadline(Method::Initialize, to_payload(&request)?, timeout)
        .await?;
    let response: InitializeResponse = parse_params(Method::Initialize, value)?;

    if response.protocol_version != PROTOCOL_VERSION {
        return Err(AppError::ProtocolViolation(format!(
            "agent speaks protocol version {}, expected {PROTOCOL_VERSION}",
            response.protocol_version
        )));
    }

    info!(
        conn = conn.label(),
        agent = response.agent_info.name,
        version = response.agent_info.version,
        "handshake: initialized"
    );
    Ok(response)
}

/// Agent side: validate an `initialize` request and build the answer.
///
/// # Errors
///
/// [`AppError::ProtocolViolation`] if the client speaks another version.
pub fn answer_initialize(
    request: &InitializeRequest,
    agent_info: Implementation,
) -> Result<InitializeResponse> {
    if request.protocol_version != PROTOCOL_VERSION {
        return Err(AppError::ProtocolViolation(format!(
            "client speaks protocol version {}, expected {PROTOCOL_VERSION}",
            request.protocol_version
        )));
    }
    Ok(InitializeResponse {
        protocol_version: PROTOCOL_VERSION,
        agent_info,
    })
}
