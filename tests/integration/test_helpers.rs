//! Helpers for tests that spawn the mock agent binary.

use agent_harness::config::{AgentConfig, HarnessConfig};

/// Path of the mock agent binary built alongside these tests.
pub const MOCK_AGENT: &str = env!("CARGO_BIN_EXE_harness-mock-agent");

/// Configuration launching the mock agent with extra `args`.
pub fn mock_agent_config(args: &[&str]) -> HarnessConfig {
    let mut agent = AgentConfig::new(MOCK_AGENT, args.iter().copied());
    agent.startup_timeout_seconds = 10;
    agent.teardown_grace_millis = 5_000;
    agent.env.insert("RUST_LOG".into(), "warn".into());
    HarnessConfig::for_agent(agent)
}

/// Configuration launching an arbitrary command.
pub fn command_config(command: &str, args: &[&str]) -> HarnessConfig {
    let mut agent = AgentConfig::new(command, args.iter().copied());
    agent.startup_timeout_seconds = 1;
    agent.teardown_grace_millis = 200;
    HarnessConfig::for_agent(agent)
}
