//! Typed payloads for the protocol methods the harness exercises.
//!
//! Field names follow the wire's `camelCase` convention.

pub mod content;
pub mod handshake;
pub mod permission;
pub mod prompt;
pub mod session;
