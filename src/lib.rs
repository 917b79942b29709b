#![forbid(unsafe_code)]

//! Test harness for conversational agent processes speaking a line-delimited
//! JSON protocol over stdio.

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod roles;
pub mod router;
pub mod rpc;

pub use config::HarnessConfig;
pub use errors::{AppError, Result};
