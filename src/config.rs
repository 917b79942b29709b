//! Harness configuration parsing and validation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::router::AggregationPolicy;
use crate::{AppError, Result};

fn default_startup_timeout_seconds() -> u64 {
    10
}

fn default_teardown_grace_millis() -> u64 {
    500
}

/// How to launch the agent under test.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary (absolute path or resolved through `PATH`).
    pub command: String,
    /// Arguments passed to the agent.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the agent process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the agent process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Bound on the `initialize` handshake.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
    /// How long teardown waits for a voluntary exit before killing.
    #[serde(default = "default_teardown_grace_millis")]
    pub teardown_grace_millis: u64,
}

impl AgentConfig {
    /// Agent launched as `command args…` with default timings.
    #[must_use]
    pub fn new(command: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            working_dir: None,
            startup_timeout_seconds: default_startup_timeout_seconds(),
            teardown_grace_millis: default_teardown_grace_millis(),
        }
    }

    /// Handshake bound as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    /// Teardown grace period as a [`Duration`].
    #[must_use]
    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_millis)
    }
}

/// One scripted exchange.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Step {
    /// Prompt text sent to the agent.
    pub say: String,
    /// Expected aggregated reply; unchecked when absent.
    #[serde(default)]
    pub expect: Option<String>,
}

/// A named sequence of exchanges run in one fresh session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioScript {
    /// Unique scenario name.
    pub name: String,
    /// Exchanges, in order.
    pub steps: Vec<Step>,
}

/// Top-level configuration parsed from `harness.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Agent under test.
    pub agent: AgentConfig,
    /// When streamed updates count as a complete response.
    #[serde(default)]
    pub aggregation: AggregationPolicy,
    /// Optional bound on each prompt call.
    #[serde(default)]
    pub call_timeout_seconds: Option<u64>,
    /// Scripted scenarios for the runner.
    #[serde(default)]
    pub scenarios: Vec<ScenarioScript>,
}

impl HarnessConfig {
    /// Configuration for `agent` with defaults everywhere else.
    #[must_use]
    pub fn for_agent(agent: AgentConfig) -> Self {
        Self {
            agent,
            aggregation: AggregationPolicy::default(),
            call_timeout_seconds: None,
            scenarios: Vec::new(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Per-call bound, if configured.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_seconds.map(Duration::from_secs)
    }

    /// Scenario with the given name.
    #[must_use]
    pub fn scenario(&self, name: &str) -> Option<&ScenarioScript> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.agent.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "agent.startup_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.call_timeout_seconds == Some(0) {
            return Err(AppError::Config(
                "call_timeout_seconds must be greater than zero".into(),
            ));
        }

        let mut names = HashSet::new();
        for scenario in &self.scenarios {
            if scenario.name.trim().is_empty() {
                return Err(AppError::Config("scenario name must not be empty".into()));
            }
            if !names.insert(scenario.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate scenario name '{}'",
                    scenario.name
                )));
            }
            if scenario.steps.is_empty() {
                return Err(AppError::Config(format!(
                    "scenario '{}' has no steps",
                    scenario.name
                )));
            }
        }

        if let Some(dir) = &self.agent.working_dir {
            let canonical = dir
                .canonicalize()
                .map_err(|err| AppError::Config(format!("agent.working_dir invalid: {err}")))?;
            self.agent.working_dir = Some(canonical);
        }

        Ok(())
    }
}
