//! Scenario lifecycle: spawn, attach, handshake, run, tear down.
//!
//! [`Scenario::run`] owns the whole lifecycle. Teardown runs exactly once
//! whether the scenario body returns, fails, or panics; a panic is re-raised
//! after the agent process has been terminated.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::config::{HarnessConfig, ScenarioScript};
use crate::models::handshake::{Implementation, InitializeResponse};
use crate::orchestrator::process::{self, ProcessHandle, SpawnSpec, TeardownReport};
use crate::roles::client::{ClientSession, MockClient};
use crate::router::SessionRouter;
use crate::rpc::connection::Connection;
use crate::rpc::handshake;
use crate::{AppError, Result};

/// Result of a scenario body together with how the agent was torn down.
#[derive(Debug)]
pub struct ScenarioOutcome<T> {
    /// Whatever the body returned, or the first harness failure.
    pub result: Result<T>,
    /// Teardown of the agent process.
    pub teardown: TeardownReport,
}

/// A running agent process with an initialized client connection.
#[derive(Debug, Clone)]
pub struct Scenario {
    process: ProcessHandle,
    connection: Connection,
    client: MockClient,
    agent_info: Implementation,
    call_timeout: Option<Duration>,
}

impl Scenario {
    /// Spawn the configured agent, attach the mock client, and run the
    /// `initialize` handshake.
    ///
    /// The process is torn down before returning if any step fails.
    ///
    /// # Errors
    ///
    /// Spawn, attach, or handshake failure.
    pub async fn start(config: &HarnessConfig) -> Result<Self> {
        let process = process::spawn(&SpawnSpec::from(&config.agent)).await?;

        match Self::connect(process.clone(), config).await {
            Ok(scenario) => Ok(scenario),
            Err(err) => {
                error!(%err, "scenario startup failed, tearing down agent");
                process.teardown().await;
                Err(err)
            }
        }
    }

    async fn connect(process: ProcessHandle, config: &HarnessConfig) -> Result<Self> {
        let router = Arc::new(SessionRouter::new(config.aggregation));
        let client = MockClient::new(Arc::clone(&router));
        let connection = process.attach(client.handler_table()?).await?;

        // Waits still outstanding when the agent goes away must fail rather
        // than hang.
        let watched = connection.clone();
        tokio::spawn(async move {
            watched.closed().await;
            let reason = watched.close_reason().await.unwrap_or_else(|| {
                AppError::ConnectionClosed(format!("{} connection stopped", watched.label()))
            });
            router.close(reason).await;
        });

        let response: InitializeResponse = match handshake::initialize(
            &connection,
            Implementation::this_crate("agent-harness"),
            config.agent.startup_timeout(),
        )
        .await
        {
            Ok(response) => response,
            Err(err) => {
                connection.close().await;
                return Err(err);
            }
        };

        Ok(Self {
            process,
            connection,
            client,
            agent_info: response.agent_info,
            call_timeout: config.call_timeout(),
        })
    }

    /// Start a scenario, run `body` against it, and tear down exactly once.
    ///
    /// If the body panics, either while building its future or while it
    /// runs, the process is torn down and the panic resumes.
    pub async fn run<T, F, Fut>(config: &HarnessConfig, body: F) -> ScenarioOutcome<T>
    where
        F: FnOnce(Scenario) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let process = match process::spawn(&SpawnSpec::from(&config.agent)).await {
            Ok(process) => process,
            Err(err) => {
                return ScenarioOutcome {
                    result: Err(err),
                    teardown: TeardownReport::default(),
                }
            }
        };
        let scenario = match Self::connect(process.clone(), config).await {
            Ok(scenario) => scenario,
            Err(err) => {
                error!(%err, "scenario startup failed, tearing down agent");
                return ScenarioOutcome {
                    result: Err(err),
                    teardown: process.teardown().await,
                };
            }
        };

        let body_scenario = scenario.clone();
        let outcome = AssertUnwindSafe(async move { body(body_scenario).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(result) => {
                let (finished, teardown) = scenario.finish().await;
                let result = match (result, finished) {
                    (Ok(value), Ok(())) => Ok(value),
                    (Err(err), _) | (Ok(_), Err(err)) => Err(err),
                };
                ScenarioOutcome { result, teardown }
            }
            Err(panic) => {
                warn!("scenario body panicked, tearing down agent");
                scenario.teardown().await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Open a fresh session on the agent.
    ///
    /// # Errors
    ///
    /// Any failure of the `session/new` call.
    pub async fn start_session(&self) -> Result<ClientSession> {
        Ok(self
            .client
            .start_session(&self.connection)
            .await?
            .with_call_timeout(self.call_timeout))
    }

    /// Client connection to the agent.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Router receiving the agent's session updates.
    #[must_use]
    pub fn router(&self) -> &Arc<SessionRouter> {
        self.client.router()
    }

    /// The agent process.
    #[must_use]
    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    /// Identity the agent reported during the handshake.
    #[must_use]
    pub fn agent_info(&self) -> &Implementation {
        &self.agent_info
    }

    /// Close the connection and terminate the process. Idempotent.
    pub async fn teardown(&self) -> TeardownReport {
        self.connection.close().await;
        self.process.teardown().await
    }

    /// Tear down, then report any protocol violations observed on the
    /// connection as [`AppError::ProtocolViolation`].
    pub async fn finish(&self) -> (Result<()>, TeardownReport) {
        let report = self.teardown().await;
        let violations = self.connection.violations().await;
        if violations.is_empty() {
            (Ok(()), report)
        } else {
            (
                Err(AppError::ProtocolViolation(violations.join("; "))),
                report,
            )
        }
    }
}

/// Run a scripted scenario in one fresh session.
///
/// The outcome carries [`AppError::Expectation`] for the first reply that
/// differs from its step's expectation, or any harness failure.
pub async fn run_script(config: &HarnessConfig, script: &ScenarioScript) -> ScenarioOutcome<()> {
    Scenario::run(config, |scenario| async move {
        let session = scenario.start_session().await?;
        for (index, step) in script.steps.iter().enumerate() {
            session.say(&step.say).await?;
            let reply = session.read_response_string().await?;
            if let Some(expected) = &step.expect {
                if &reply != expected {
                    return Err(AppError::Expectation(format!(
                        "scenario '{}' step {}: said {:?}, expected {expected:?}, got {reply:?}",
                        script.name,
                        index + 1,
                        step.say
                    )));
                }
            }
            info!(scenario = script.name, step = index + 1, "scenario step passed");
        }
        Ok(())
    })
    .await
}
