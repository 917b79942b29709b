//! Inbound reader and dispatcher tasks.
//!
//! The reader is driven by [`FramedRead`] backed by [`FrameCodec`] and does
//! nothing but decode: each [`Message`] is queued, in frame order, for the
//! dispatcher. End of stream and decode failures are queued as a final
//! [`Inbound::Closed`] item so that messages read before the failure are
//! still dispatched first.
//!
//! # Dispatch rules
//!
//! | Inbound        | Action                                                     |
//! |----------------|------------------------------------------------------------|
//! | Request        | Handler spawned as its own task; exactly one Response sent |
//! | Response       | Routed to the pending waiter by identifier                 |
//! | Notification   | Handler awaited in arrival order; failures logged          |
//! | Closed         | All pending waiters failed; dispatch stops                 |
//!
//! Notification handlers run on the dispatcher itself, so they must not
//! issue calls on the same connection and wait for the reply.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::RpcError;
use crate::rpc::codec::FrameCodec;
use crate::rpc::connection::Connection;
use crate::rpc::message::{Message, RequestId};
use crate::AppError;

/// Item handed from the reader to the dispatcher.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// A decoded frame.
    Message(Message),
    /// The inbound stream ended or failed; no further items follow.
    Closed(AppError),
}

/// Reader task: decode frames from `source` and queue them for dispatch.
pub(crate) async fn run_reader<R>(
    conn: String,
    source: R,
    dispatch_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(source, FrameCodec::new());

    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(conn, "reader: cancellation received, stopping");
                return;
            }

            item = framed.next() => item,
        };

        let inbound = match item {
            None => {
                debug!(conn, "reader: EOF detected");
                Inbound::Closed(AppError::ConnectionClosed(format!(
                    "{conn} inbound stream closed"
                )))
            }
            Some(Err(err)) => {
                warn!(conn, error = %err, "reader: inbound stream failed, stopping");
                Inbound::Closed(err)
            }
            Some(Ok(msg)) => Inbound::Message(msg),
        };

        let last = matches!(inbound, Inbound::Closed(_));
        if dispatch_tx.send(inbound).await.is_err() {
            debug!(conn, "reader: dispatcher gone, stopping");
            return;
        }
        if last {
            return;
        }
    }
}

/// Dispatcher task: apply the dispatch rules to each queued inbound item.
pub(crate) async fn run_dispatcher(
    conn: Connection,
    mut inbound_rx: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(conn = conn.label(), "dispatcher: cancellation received, stopping");
                break;
            }

            item = inbound_rx.recv() => item,
        };

        match item {
            None => break,
            Some(Inbound::Closed(err)) => {
                conn.shut_down(err).await;
                break;
            }
            Some(Inbound::Message(Message::Request {
                id,
                method,
                payload,
            })) => spawn_request(&conn, id, method, payload),
            Some(Inbound::Message(Message::Response { id, outcome })) => {
                conn.resolve(id, outcome).await;
            }
            Some(Inbound::Message(Message::Notification { method, payload })) => {
                dispatch_notification(&conn, &method, payload).await;
            }
        }
    }
}

/// Launch the handler for one inbound request; always answers exactly once.
fn spawn_request(conn: &Connection, id: RequestId, method: String, payload: Value) {
    let handler = conn.handlers().request(&method);
    let peer = conn.clone();

    conn.tasks().spawn(async move {
        let outcome = match handler {
            Ok(handler) => AssertUnwindSafe(handler(peer.clone(), payload))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(AppError::Handler(format!(
                        "{method} handler panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                }),
            Err(err) => Err(err),
        };

        if let Err(err) = &outcome {
            warn!(conn = peer.label(), id, method, error = %err, "request failed");
        } else {
            debug!(conn = peer.label(), id, method, "request handled");
        }

        let response = Message::Response {
            id,
            outcome: outcome.map_err(|err| RpcError::from(&err)),
        };
        if let Err(err) = peer.send(response).await {
            warn!(conn = peer.label(), id, error = %err, "failed to send response");
        }
    });
}

/// Runs inline: a slow handler delays every later inbound frame.
async fn dispatch_notification(conn: &Connection, method: &str, payload: Value) {
    let Some(handler) = conn.handlers().notification(method) else {
        debug!(
            conn = conn.label(),
            method, "dispatcher: no handler for inbound notification, skipping"
        );
        return;
    };

    let result = AssertUnwindSafe(handler(conn.clone(), payload))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(AppError::Handler(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )))
        });

    if let Err(err) = result {
        warn!(conn = conn.label(), method, error = %err, "notification handler failed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
