//! Duplex connection: correlation, concurrency, and failure semantics.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncWrite};

use agent_harness::rpc::message::Message;
use agent_harness::rpc::{Connection, HandlerTable, Handlers, Method, Role};
use agent_harness::AppError;

use super::test_helpers::{connected_pair, eventually, raw_pair};

/// Agent table whose prompt handler sleeps `delayMs` then echoes `tag`.
fn delayed_echo_agent() -> HandlerTable {
    Handlers::new(Role::Agent)
        .on_request(Method::Prompt, |_peer, params: Value| async move {
            let delay = params["delayMs"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(json!({ "tag": params["tag"].clone() }))
        })
        .build()
        .expect("agent table")
}

fn client_table() -> HandlerTable {
    HandlerTable::empty(Role::Client)
}

// ── Correlation ──────────────────────────────────────────────────────────────

/// Concurrent calls answered in reverse order each receive their own result.
#[tokio::test]
async fn concurrent_calls_resolve_to_their_own_responses() {
    let (client, _agent) = connected_pair(client_table(), delayed_echo_agent());

    let calls = (0..8u64).map(|tag| {
        let client = client.clone();
        async move {
            let delay = (8 - tag) * 15;
            let result = client
                .call(Method::Prompt, json!({ "tag": tag, "delayMs": delay }))
                .await
                .expect("call must succeed");
            (tag, result)
        }
    });

    for (tag, result) in join_all(calls).await {
        assert_eq!(result, json!({ "tag": tag }), "call {tag} got another call's result");
    }
    assert_eq!(client.pending_calls().await, 0);
}

/// Request identifiers are unique per connection and increase monotonically.
#[tokio::test]
async fn request_ids_are_unique_and_increasing() {
    let (conn, mut peer) = raw_pair(client_table());

    for _ in 0..3 {
        let conn = conn.clone();
        tokio::spawn(async move {
            let _ = conn.call(Method::NewSession, json!({})).await;
        });
    }

    let mut ids = Vec::new();
    for _ in 0..3 {
        match peer.next_message().await {
            Message::Request { id, method, .. } => {
                assert_eq!(method, "session/new");
                ids.push(id);
            }
            other => panic!("expected a request, got {other:?}"),
        }
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3, "ids must be unique: {ids:?}");
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// A request for a method the peer does not serve gets an error response.
#[tokio::test]
async fn unknown_method_is_answered_with_protocol_violation() {
    let (client, _agent) = connected_pair(client_table(), delayed_echo_agent());

    let err = client
        .call_raw("bogus/method", json!({}))
        .await
        .expect_err("unknown method must fail");
    assert!(matches!(err, AppError::ProtocolViolation(_)), "got {err:?}");
}

/// A registered method without a handler on this side is refused the same way.
#[tokio::test]
async fn unregistered_method_is_answered_with_protocol_violation() {
    let (client, _agent) = connected_pair(client_table(), delayed_echo_agent());

    let err = client
        .call(Method::NewSession, json!({}))
        .await
        .expect_err("unregistered method must fail");
    assert!(matches!(err, AppError::ProtocolViolation(_)), "got {err:?}");
}

/// A panicking handler still produces exactly one error response, and the
/// connection keeps serving.
#[tokio::test]
async fn handler_panic_becomes_error_response() {
    let agent = Handlers::new(Role::Agent)
        .on_request(Method::Prompt, |_peer, _params| async move {
            if true {
                panic!("prompt handler exploded");
            }
            Ok(Value::Null)
        })
        .on_request(Method::NewSession, |_peer, _params| async move {
            Ok(json!({ "sessionId": "s-1" }))
        })
        .build()
        .expect("agent table");
    let (client, _agent) = connected_pair(client_table(), agent);

    let err = client
        .call(Method::Prompt, json!({}))
        .await
        .expect_err("panicking handler must fail the call");
    match err {
        AppError::Handler(msg) => assert!(msg.contains("exploded"), "got {msg}"),
        other => panic!("expected handler error, got {other:?}"),
    }

    let ok = client
        .call(Method::NewSession, json!({}))
        .await
        .expect("connection must keep serving");
    assert_eq!(ok, json!({ "sessionId": "s-1" }));
}

/// Domain errors cross the wire as the same variant.
#[tokio::test]
async fn handler_errors_keep_their_kind_across_the_wire() {
    let agent = Handlers::new(Role::Agent)
        .on_request(Method::Prompt, |_peer, _params| async move {
            Err(AppError::SessionNotFound("unknown session 'x'".into()))
        })
        .build()
        .expect("agent table");
    let (client, _agent) = connected_pair(client_table(), agent);

    let err = client.call(Method::Prompt, json!({})).await.expect_err("must fail");
    assert_eq!(err, AppError::SessionNotFound("unknown session 'x'".into()));
}

/// Notifications reach their handler in the order they were sent.
#[tokio::test]
async fn notifications_are_handled_in_order() {
    let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let agent = Handlers::new(Role::Agent)
        .on_notification(Method::Cancel, move |_peer, params: Value| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(params["n"].as_u64().unwrap_or(0));
                Ok(())
            }
        })
        .build()
        .expect("agent table");
    let (client, _agent) = connected_pair(client_table(), agent);

    for n in 0..20u64 {
        client
            .notify(Method::Cancel, json!({ "n": n }))
            .await
            .expect("notify");
    }

    eventually("all notifications handled", || {
        let seen = Arc::clone(&seen);
        async move { seen.lock().await.len() == 20 }
    })
    .await;
    assert_eq!(*seen.lock().await, (0..20).collect::<Vec<_>>());
}

/// A failing notification handler produces no frame and does not stop the
/// connection.
#[tokio::test]
async fn failing_notification_handler_is_contained() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let agent = Handlers::new(Role::Agent)
        .on_notification(Method::Cancel, move |_peer, _params| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Handler("cancel failed".into()))
            }
        })
        .on_request(Method::NewSession, |_peer, _params| async move {
            Ok(json!({ "sessionId": "s-2" }))
        })
        .build()
        .expect("agent table");
    let (client, agent) = connected_pair(client_table(), agent);

    client.notify(Method::Cancel, json!({})).await.expect("notify");
    let ok = client.call(Method::NewSession, json!({})).await.expect("call");

    assert_eq!(ok, json!({ "sessionId": "s-2" }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!agent.is_closed().await);
}

// ── Failure semantics ────────────────────────────────────────────────────────

/// Peer EOF fails every pending call with `ConnectionClosed`.
#[tokio::test]
async fn peer_eof_fails_all_pending_calls() {
    let (conn, mut peer) = raw_pair(client_table());

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.call(Method::NewSession, json!({})).await })
        })
        .collect();

    for _ in 0..3 {
        peer.next_message().await;
    }
    assert_eq!(conn.pending_calls().await, 3);
    drop(peer);

    for handle in handles {
        let err = handle.await.expect("join").expect_err("call must fail");
        assert!(matches!(err, AppError::ConnectionClosed(_)), "got {err:?}");
    }
    assert_eq!(conn.pending_calls().await, 0);

    let err = conn
        .call(Method::NewSession, json!({}))
        .await
        .expect_err("closed connection must refuse new calls");
    assert!(matches!(err, AppError::ConnectionClosed(_)), "got {err:?}");
}

/// A malformed inbound frame closes the connection with a framing error.
#[tokio::test]
async fn malformed_frame_fails_pending_calls_with_framing_error() {
    let (conn, mut peer) = raw_pair(client_table());

    let pending = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.call(Method::NewSession, json!({})).await })
    };
    peer.next_message().await;
    peer.send_line("{this is not json").await;

    let err = pending.await.expect("join").expect_err("call must fail");
    assert!(matches!(err, AppError::Framing(_)), "got {err:?}");
    assert!(matches!(conn.close_reason().await, Some(AppError::Framing(_))));
}

/// A truncated final frame is reported as a framing error, not dropped.
#[tokio::test]
async fn truncated_final_frame_is_a_framing_error() {
    let (conn, mut peer) = raw_pair(client_table());

    let pending = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.call(Method::NewSession, json!({})).await })
    };
    peer.next_message().await;
    peer.send_bytes(b"{\"kind\":\"response\",\"id\":1,\"res").await;
    drop(peer);

    let err = pending.await.expect("join").expect_err("call must fail");
    assert!(matches!(err, AppError::Framing(_)), "got {err:?}");
}

/// A deadline-wrapped call times out and leaves no correlation state behind;
/// the late response is discarded without a violation.
#[tokio::test]
async fn call_deadline_times_out_and_cleans_up() {
    let (conn, mut peer) = raw_pair(client_table());

    let err = conn
        .call_with_deadline(Method::NewSession, json!({}), Duration::from_millis(50))
        .await
        .expect_err("call must time out");
    assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
    assert_eq!(conn.pending_calls().await, 0);

    let Message::Request { id, .. } = peer.next_message().await else {
        panic!("expected the timed-out request");
    };
    peer.send_line(&format!("{{\"kind\":\"response\",\"id\":{id},\"result\":{{}}}}"))
        .await;

    // A later call still works and the late response left no violation.
    let follow_up = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.call(Method::NewSession, json!({})).await })
    };
    let Message::Request { id: next, .. } = peer.next_message().await else {
        panic!("expected the follow-up request");
    };
    peer.send_line(&format!(
        "{{\"kind\":\"response\",\"id\":{next},\"result\":{{\"sessionId\":\"s\"}}}}"
    ))
    .await;
    follow_up.await.expect("join").expect("follow-up call");
    assert!(conn.violations().await.is_empty());
}

/// A response nobody asked for is recorded as a protocol violation.
#[tokio::test]
async fn unmatched_response_is_recorded_as_violation() {
    let (conn, mut peer) = raw_pair(client_table());

    peer.send_line("{\"kind\":\"response\",\"id\":999,\"result\":{}}").await;

    eventually("violation recorded", || {
        let conn = conn.clone();
        async move { !conn.violations().await.is_empty() }
    })
    .await;
    let violations = conn.violations().await;
    assert!(violations[0].contains("999"), "got {violations:?}");
    assert!(!conn.is_closed().await, "a stray response must not close the connection");
}

/// A second response for an already-resolved id is a violation; the first
/// one still resolved the call.
#[tokio::test]
async fn duplicate_response_is_recorded_as_violation() {
    let (conn, mut peer) = raw_pair(client_table());

    let pending = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.call(Method::NewSession, json!({})).await })
    };
    let Message::Request { id, .. } = peer.next_message().await else {
        panic!("expected a request");
    };
    let reply = format!("{{\"kind\":\"response\",\"id\":{id},\"result\":{{\"n\":1}}}}");
    peer.send_line(&reply).await;
    peer.send_line(&reply).await;

    assert_eq!(pending.await.expect("join").expect("call"), json!({ "n": 1 }));
    eventually("duplicate recorded", || {
        let conn = conn.clone();
        async move { !conn.violations().await.is_empty() }
    })
    .await;
    assert!(conn.violations().await[0].contains("duplicate"));
}

/// Closing locally fails pending calls and lets the peer observe EOF.
#[tokio::test]
async fn local_close_fails_pending_and_closes_peer() {
    let (client, agent) = connected_pair(client_table(), delayed_echo_agent());

    let pending = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call(Method::Prompt, json!({ "tag": 1, "delayMs": 5_000 }))
                .await
        })
    };
    eventually("call in flight", || {
        let client = client.clone();
        async move { client.pending_calls().await == 1 }
    })
    .await;

    client.close().await;

    let err = pending.await.expect("join").expect_err("call must fail");
    assert!(matches!(err, AppError::ConnectionClosed(_)), "got {err:?}");
    tokio::time::timeout(Duration::from_secs(5), agent.closed())
        .await
        .expect("peer must observe the close");
}

/// Output stream whose every write fails, like a pipe to an exited process.
struct BrokenPipe;

impl AsyncWrite for BrokenPipe {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A failed write fails the call that triggered it and every later call
/// with a transport error.
#[tokio::test]
async fn write_failure_fails_current_and_later_calls_with_transport_error() {
    let (source, _peer) = duplex(1024);
    let client = Connection::spawn("client", source, BrokenPipe, client_table());

    let first = tokio::time::timeout(
        Duration::from_secs(5),
        client.call(Method::Prompt, json!({ "tag": 1 })),
    )
    .await
    .expect("call must not hang")
    .expect_err("write must fail");
    assert!(matches!(first, AppError::Transport(_)), "got {first:?}");

    let second = client
        .call(Method::Prompt, json!({ "tag": 2 }))
        .await
        .expect_err("connection is broken");
    assert!(matches!(second, AppError::Transport(_)), "got {second:?}");
    assert!(client.is_closed().await);
    assert_eq!(client.pending_calls().await, 0);
}

/// A notification queued just before a local close still reaches the peer.
#[tokio::test]
async fn notification_sent_before_close_is_delivered() {
    let (conn, mut peer) = raw_pair(client_table());

    conn.notify(Method::Cancel, json!({ "sessionId": "s-1" }))
        .await
        .expect("notify");
    conn.close().await;

    assert_eq!(
        peer.next_message().await,
        Message::Notification {
            method: "session/cancel".into(),
            payload: json!({ "sessionId": "s-1" }),
        }
    );
}
