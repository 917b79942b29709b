//! Reference implementations of both protocol roles.
//!
//! - `agent`: the mock agent, answering prompts through an injected handler.
//! - `client`: the test client, auto-approving permission requests and
//!   stubbing file-system and terminal capabilities.
//! - `responders`: canned prompt handlers used by scenarios and the mock
//!   agent binary.

pub mod agent;
pub mod client;
pub mod responders;

pub use agent::{MockAgent, PromptHandler};
pub use client::{ClientSession, MockClient};
