//! End-to-end scenarios against the mock agent process over real stdio.

use std::sync::{Arc, Mutex};

use agent_harness::config::{ScenarioScript, Step};
use agent_harness::models::prompt::{PromptRequest, PromptResponse, StopReason};
use agent_harness::orchestrator::{run_script, ProcessHandle, Scenario};
use agent_harness::roles::responders::{FALLBACK_REPLY, GREETING, GREETING_REPLY};
use agent_harness::router::AggregationPolicy;
use agent_harness::rpc::Method;
use agent_harness::AppError;

use super::test_helpers::{command_config, mock_agent_config};

// ── Happy path ───────────────────────────────────────────────────────────────

/// The basic-echo agent greets back and falls back on anything else; the
/// process is terminated exactly once and exits on its own.
#[tokio::test]
async fn basic_echo_over_stdio() {
    let config = mock_agent_config(&["--responder", "basic-echo"]);

    let outcome = Scenario::run(&config, |scenario| async move {
        assert_eq!(scenario.agent_info().name, "harness-mock-agent");
        let session = scenario.start_session().await?;

        assert_eq!(session.say(GREETING).await?, StopReason::EndTurn);
        let first = session.read_response_string().await?;

        session.say("Tell me a joke").await?;
        let second = session.read_response_string().await?;
        Ok((first, second))
    })
    .await;

    let (first, second) = outcome.result.expect("scenario succeeds");
    assert_eq!(first, GREETING_REPLY);
    assert_eq!(second, FALLBACK_REPLY);
    assert_eq!(outcome.teardown.terminations, 1);
    assert!(!outcome.teardown.forced, "agent must exit when its stdin closes");
    assert_eq!(outcome.teardown.exit_code, Some(0));
}

/// End-of-turn aggregation over a real process yields the same replies.
#[tokio::test]
async fn end_of_turn_aggregation_over_stdio() {
    let mut config = mock_agent_config(&["--responder", "echo"]);
    config.aggregation = AggregationPolicy::EndOfTurn;

    let outcome = Scenario::run(&config, |scenario| async move {
        let session = scenario.start_session().await?;
        session.say("ping").await?;
        session.read_response_string().await
    })
    .await;

    assert_eq!(outcome.result.expect("scenario succeeds"), "ping");
}

/// An agent asking permission before each turn is auto-approved.
#[tokio::test]
async fn permission_gate_over_stdio() {
    let config = mock_agent_config(&["--responder", "basic-echo", "--request-permission"]);

    let outcome = Scenario::run(&config, |scenario| async move {
        let session = scenario.start_session().await?;
        let stop = session.say(GREETING).await?;
        Ok((stop, session.read_response_string().await?))
    })
    .await;

    let (stop, reply) = outcome.result.expect("scenario succeeds");
    assert_eq!(stop, StopReason::EndTurn);
    assert_eq!(reply, GREETING_REPLY);
}

// ── Agent failure modes ──────────────────────────────────────────────────────

/// Prompting an unknown session fails without disturbing a live one.
#[tokio::test]
async fn unknown_session_over_stdio() {
    let config = mock_agent_config(&[]);

    let outcome = Scenario::run(&config, |scenario| async move {
        let live = scenario.start_session().await?;
        let err = scenario
            .connection()
            .request::<_, PromptResponse>(Method::Prompt, &PromptRequest::text("missing", "hi"))
            .await
            .expect_err("unknown session must fail");
        live.say(GREETING).await?;
        Ok((err, live.read_response_string().await?))
    })
    .await;

    let (err, reply) = outcome.result.expect("scenario succeeds");
    assert!(matches!(err, AppError::SessionNotFound(_)), "got {err:?}");
    assert_eq!(reply, GREETING_REPLY);
}

/// An agent started without a responder rejects prompts.
#[tokio::test]
async fn unconfigured_agent_rejects_prompts() {
    let config = mock_agent_config(&["--responder", "unconfigured"]);

    let outcome = Scenario::run(&config, |scenario| async move {
        let session = scenario.start_session().await?;
        session.say(GREETING).await
    })
    .await;

    let err = outcome.result.expect_err("prompt must fail");
    assert!(matches!(err, AppError::HandlerNotConfigured(_)), "got {err:?}");
    assert_eq!(outcome.teardown.terminations, 1);
}

// ── Teardown guarantees ──────────────────────────────────────────────────────

/// A failing scenario body still tears the agent down exactly once.
#[tokio::test]
async fn failing_body_tears_down_once() {
    let config = mock_agent_config(&[]);
    let seen: Arc<Mutex<Option<ProcessHandle>>> = Arc::default();
    let slot = Arc::clone(&seen);

    let outcome = Scenario::run(&config, |scenario| async move {
        *slot.lock().unwrap() = Some(scenario.process().clone());
        Err::<(), _>(AppError::Expectation("body gave up".into()))
    })
    .await;

    assert_eq!(
        outcome.result.expect_err("body error is returned"),
        AppError::Expectation("body gave up".into())
    );
    assert_eq!(outcome.teardown.terminations, 1);

    let process = seen.lock().unwrap().take().expect("process captured");
    assert!(process.is_torn_down().await);
    let again = process.teardown().await;
    assert_eq!(again.terminations, 1, "second teardown must not terminate again");
}

/// A panicking scenario body tears the agent down before the panic resumes.
#[tokio::test]
async fn panicking_body_tears_down_once() {
    let config = mock_agent_config(&[]);
    let seen: Arc<Mutex<Option<ProcessHandle>>> = Arc::default();
    let slot = Arc::clone(&seen);

    let joined = tokio::spawn(async move {
        Scenario::run(&config, |scenario| async move {
            *slot.lock().unwrap() = Some(scenario.process().clone());
            if scenario.agent_info().name.is_empty() {
                return Ok(());
            }
            panic!("scenario body blew up");
        })
        .await
    })
    .await;

    let err = joined.expect_err("panic must propagate");
    assert!(err.is_panic());

    let process = seen.lock().unwrap().take().expect("process captured");
    assert!(process.is_torn_down().await);
    assert_eq!(process.terminations().await, 1);
}

/// A body that panics before yielding its future still tears down once.
#[tokio::test]
async fn body_panicking_before_its_future_tears_down_once() {
    let config = mock_agent_config(&[]);
    let seen: Arc<Mutex<Option<ProcessHandle>>> = Arc::default();
    let slot = Arc::clone(&seen);

    let joined = tokio::spawn(async move {
        Scenario::run(&config, move |scenario| -> std::future::Ready<agent_harness::Result<()>> {
            *slot.lock().unwrap() = Some(scenario.process().clone());
            panic!("scenario body blew up while starting");
        })
        .await
    })
    .await;

    let err = joined.expect_err("panic must propagate");
    assert!(err.is_panic());

    let process = seen.lock().unwrap().take().expect("process captured");
    assert!(process.is_torn_down().await);
    assert_eq!(process.terminations().await, 1);
}

/// An explicit teardown inside the body is not repeated by the lifecycle.
#[tokio::test]
async fn teardown_inside_body_is_not_repeated() {
    let config = mock_agent_config(&[]);

    let outcome = Scenario::run(&config, |scenario| async move {
        let first = scenario.teardown().await;
        let second = scenario.teardown().await;
        Ok((first, second))
    })
    .await;

    let (first, second) = outcome.result.expect("scenario succeeds");
    assert_eq!(first.terminations, 1);
    assert_eq!(second.terminations, 1);
    assert_eq!(outcome.teardown.terminations, 1);
}

// ── Startup failures ─────────────────────────────────────────────────────────

/// A command that cannot be spawned fails with a process error and nothing
/// to tear down.
#[tokio::test]
async fn unspawnable_agent_is_a_process_error() {
    let config = command_config("/nonexistent/agent-binary", &[]);

    let outcome = Scenario::run(&config, |_scenario| async move { Ok(()) }).await;

    assert!(matches!(outcome.result, Err(AppError::Process(_))));
    assert_eq!(outcome.teardown.terminations, 0);
}

/// An agent that exits before the handshake fails startup with a closed
/// connection and is still reaped.
#[cfg(unix)]
#[tokio::test]
async fn agent_exiting_before_handshake_fails_startup() {
    let config = command_config("true", &[]);

    let outcome = Scenario::run(&config, |_scenario| async move { Ok(()) }).await;

    let err = outcome.result.expect_err("startup must fail");
    assert!(
        matches!(err, AppError::ConnectionClosed(_) | AppError::Transport(_)),
        "got {err:?}"
    );
    assert_eq!(outcome.teardown.terminations, 1);
}

/// An agent that never answers the handshake times out and is killed.
#[cfg(unix)]
#[tokio::test]
async fn silent_agent_times_out_and_is_killed() {
    let config = command_config("sleep", &["30"]);

    let outcome = Scenario::run(&config, |_scenario| async move { Ok(()) }).await;

    assert!(matches!(outcome.result, Err(AppError::Timeout(_))));
    assert_eq!(outcome.teardown.terminations, 1);
    assert!(outcome.teardown.forced, "sleep ignores stdin and must be killed");
}

// ── Scripted scenarios ───────────────────────────────────────────────────────

fn greeting_script(expect_second: &str) -> ScenarioScript {
    ScenarioScript {
        name: "greeting".into(),
        steps: vec![
            Step {
                say: GREETING.into(),
                expect: Some(GREETING_REPLY.into()),
            },
            Step {
                say: "anything else".into(),
                expect: Some(expect_second.into()),
            },
        ],
    }
}

/// A script whose expectations hold passes.
#[tokio::test]
async fn passing_script() {
    let config = mock_agent_config(&[]);
    let outcome = run_script(&config, &greeting_script(FALLBACK_REPLY)).await;

    outcome.result.expect("script passes");
    assert_eq!(outcome.teardown.terminations, 1);
}

/// A script with a wrong expectation fails with an expectation error naming
/// the step.
#[tokio::test]
async fn failing_script_reports_the_step() {
    let config = mock_agent_config(&[]);
    let outcome = run_script(&config, &greeting_script("Something else")).await;

    match outcome.result {
        Err(AppError::Expectation(msg)) => {
            assert!(msg.contains("step 2"), "got {msg}");
            assert!(msg.contains(FALLBACK_REPLY), "got {msg}");
        }
        other => panic!("expected an expectation failure, got {other:?}"),
    }
    assert_eq!(outcome.teardown.terminations, 1);
}

/// Driving the lifecycle by hand: start, converse, finish.
#[tokio::test]
async fn manual_start_and_finish() {
    let config = mock_agent_config(&["--responder", "echo"]);
    let scenario = Scenario::start(&config).await.expect("start");

    let session = scenario.start_session().await.expect("session");
    assert!(scenario.router().contains(session.id()).await);
    session.say("one").await.expect("say");
    assert_eq!(session.read_response_string().await.expect("reply"), "one");

    let (finished, report) = scenario.finish().await;
    finished.expect("no protocol violations");
    assert_eq!(report.terminations, 1);

    let err = session.say("two").await.expect_err("connection is gone");
    assert!(
        matches!(err, AppError::ConnectionClosed(_) | AppError::SessionNotFound(_)),
        "got {err:?}"
    );
}
