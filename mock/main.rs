#![forbid(unsafe_code)]

//! `harness-mock-agent`: reference agent process for the harness.
//!
//! Speaks the protocol on `stdin`/`stdout` and answers prompts with a canned
//! responder. Logs go to `stderr`. Exits when the client closes its end.

use std::time::Duration;

use clap::Parser;
use tracing::info;

use agent_harness::logging::{init_tracing, LogFormat};
use agent_harness::roles::responders::Responder;
use agent_harness::roles::MockAgent;
use agent_harness::rpc::Connection;
use agent_harness::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "harness-mock-agent",
    about = "Mock agent speaking the harness protocol over stdio",
    version,
    long_about = None
)]
struct Cli {
    /// Prompt responder: basic-echo, echo, or unconfigured.
    #[arg(long, default_value = "basic-echo")]
    responder: Responder,

    /// Ask the client for permission before answering each prompt.
    #[arg(long)]
    request_permission: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    // A blocking stdin read may still be parked when the connection failed
    // for another reason.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(args: Cli) -> Result<()> {
    let mut builder = MockAgent::builder().require_permission(args.request_permission);
    if let Some(handler) = args.responder.handler() {
        builder = builder.prompt_handler(handler);
    }
    let agent = builder.build();

    let conn = Connection::spawn(
        "agent",
        tokio::io::stdin(),
        tokio::io::stdout(),
        agent.handler_table()?,
    );
    info!(responder = ?args.responder, permission = args.request_permission, "mock agent ready");

    conn.closed().await;
    agent.close_all().await;

    match conn.close_reason().await {
        Some(AppError::ConnectionClosed(_)) | None => {
            info!("client closed the connection, exiting");
            Ok(())
        }
        Some(err) => Err(err),
    }
}
