#![forbid(unsafe_code)]

//! `agent-harness`: scripted scenario runner.
//!
//! Loads a harness configuration, runs each scripted scenario against a
//! freshly spawned agent process, and prints one result line per scenario.
//! Exits non-zero when any scenario fails.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use agent_harness::config::{HarnessConfig, ScenarioScript};
use agent_harness::logging::{init_tracing, LogFormat};
use agent_harness::orchestrator::run_script;
use agent_harness::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "agent-harness",
    about = "Run scripted conversations against an agent process",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Only run the named scenario (repeatable).
    #[arg(long = "scenario")]
    scenarios: Vec<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = HarnessConfig::load_from_path(&args.config)?;
    let selected = select_scenarios(&config, &args.scenarios)?;
    if selected.is_empty() {
        return Err(AppError::Config("no scenarios configured".into()));
    }
    info!(count = selected.len(), command = config.agent.command, "running scenarios");

    tokio::select! {
        result = run_all(&config, &selected) => result,
        () = shutdown_signal() => {
            warn!("interrupted, remaining scenarios skipped");
            Err(AppError::Process("interrupted".into()))
        }
    }
}

async fn run_all(config: &HarnessConfig, scenarios: &[&ScenarioScript]) -> Result<()> {
    let mut failed = 0usize;
    for script in scenarios {
        let outcome = run_script(config, script).await;
        match outcome.result {
            Ok(()) => println!("PASS {}", script.name),
            Err(err) => {
                failed += 1;
                println!("FAIL {}: {err}", script.name);
            }
        }
        info!(
            scenario = script.name,
            terminations = outcome.teardown.terminations,
            forced = outcome.teardown.forced,
            "scenario finished"
        );
    }

    if failed == 0 {
        Ok(())
    } else {
        Err(AppError::Expectation(format!(
            "{failed} of {} scenarios failed",
            scenarios.len()
        )))
    }
}

fn select_scenarios<'a>(
    config: &'a HarnessConfig,
    names: &[String],
) -> Result<Vec<&'a ScenarioScript>> {
    if names.is_empty() {
        return Ok(config.scenarios.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            config
                .scenario(name)
                .ok_or_else(|| AppError::Config(format!("unknown scenario '{name}'")))
        })
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}
