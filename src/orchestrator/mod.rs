//! Agent process orchestration.
//!
//! Covers spawning the agent under test, wiring its stdio into a client
//! connection, and the scenario lifecycle that guarantees teardown.

pub mod process;
pub mod scenario;

pub use process::{ProcessHandle, SpawnSpec, TeardownReport};
pub use scenario::{run_script, Scenario, ScenarioOutcome};
