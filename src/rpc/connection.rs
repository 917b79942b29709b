//! Role-agnostic duplex RPC peer.
//!
//! A [`Connection`] owns one inbound and one outbound stream and runs three
//! tasks over them:
//!
//! - **reader**: decodes frames with [`FrameCodec`](crate::rpc::codec::FrameCodec)
//!   and queues them, in order, for the dispatcher;
//! - **dispatcher**: resolves responses against the pending-call map,
//!   runs notification handlers in arrival order, and launches each request
//!   handler as an independent task;
//! - **writer**: the single writer of the outbound stream.
//!
//! The pending-call map is the only mutable correlation state and is touched
//! exclusively under its mutex. When the inbound stream ends, fails to parse,
//! or the outbound stream fails to write, every pending call is resolved with
//! the failure and later calls fail immediately with the same error.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::errors::RpcError;
use crate::rpc::handlers::{to_payload, HandlerTable};
use crate::rpc::message::{Message, RequestId};
use crate::rpc::method::{Method, Role};
use crate::rpc::{reader, writer};
use crate::{AppError, Result};

/// Capacity of the outbound and dispatch queues.
const QUEUE_CAPACITY: usize = 256;

type Waiter = oneshot::Sender<Result<Value>>;

/// Correlation state guarded by a single mutex.
#[derive(Debug, Default)]
struct PendingCalls {
    waiters: HashMap<RequestId, Waiter>,
    /// Calls whose caller gave up (deadline); a late response is expected.
    abandoned: HashSet<RequestId>,
    /// Set once; every later call fails with this error.
    closed: Option<AppError>,
}

struct Inner {
    label: String,
    handlers: HandlerTable,
    next_id: AtomicU64,
    outbound: mpsc::Sender<Message>,
    pending: Mutex<PendingCalls>,
    violations: Mutex<Vec<String>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// Cheaply cloneable handle to a running duplex connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.inner.label)
            .field("role", &self.inner.handlers.role())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Attach a connection to a pair of streams and start its tasks.
    ///
    /// `label` only appears in logs. The connection serves the methods in
    /// `handlers`; every other inbound request is answered with a
    /// [`AppError::ProtocolViolation`] error response.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, W>(label: impl Into<String>, source: R, sink: W, handlers: HandlerTable) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let (out_tx, out_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        let conn = Self {
            inner: Arc::new(Inner {
                label: label.clone(),
                handlers,
                next_id: AtomicU64::new(1),
                outbound: out_tx,
                pending: Mutex::new(PendingCalls::default()),
                violations: Mutex::new(Vec::new()),
                cancel: cancel.clone(),
                tasks: TaskTracker::new(),
            }),
        };

        let writer_conn = conn.clone();
        let writer_cancel = cancel.clone();
        conn.inner.tasks.spawn(async move {
            let result =
                writer::run_writer(writer_conn.label().to_owned(), sink, out_rx, writer_cancel).await;
            if let Err(err) = result {
                let err = match err {
                    AppError::Transport(_) => err,
                    other => AppError::Transport(other.to_string()),
                };
                writer_conn.shut_down(err).await;
            }
        });

        conn.inner.tasks.spawn(reader::run_reader(
            label.clone(),
            source,
            in_tx,
            cancel.clone(),
        ));

        conn.inner
            .tasks
            .spawn(reader::run_dispatcher(conn.clone(), in_rx, cancel));

        info!(conn = label, role = %conn.role(), "connection attached");
        conn
    }

    /// Log label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Role whose inbound methods this connection serves.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.handlers.role()
    }

    pub(crate) fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.inner.tasks
    }

    // ── Outbound calls ───────────────────────────────────────────────────────

    /// Issue a request and wait for its correlated response.
    ///
    /// # Errors
    ///
    /// - The peer's error response, rebuilt as the matching [`AppError`].
    /// - [`AppError::ConnectionClosed`] / [`AppError::Framing`] /
    ///   [`AppError::Transport`] if the connection fails before the response
    ///   arrives.
    pub async fn call(&self, method: Method, params: Value) -> Result<Value> {
        self.call_raw(method.as_str(), params).await
    }

    /// [`call`](Self::call) with an arbitrary wire method name.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_raw(&self, method: &str, params: Value) -> Result<Value> {
        let (_, rx) = self.start_call(method, params).await?;
        await_waiter(rx).await
    }

    /// Issue a request with an external deadline.
    ///
    /// If the deadline fires, the pending waiter is removed so no correlation
    /// state leaks; a response arriving later is discarded.
    ///
    /// # Errors
    ///
    /// [`AppError::Timeout`] when `timeout` elapses, otherwise as
    /// [`call`](Self::call).
    pub async fn call_with_deadline(
        &self,
        method: Method,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let (id, rx) = self.start_call(method.as_str(), params).await?;
        if let Ok(outcome) = tokio::time::timeout(timeout, await_waiter(rx)).await {
            outcome
        } else {
            self.abandon(id).await;
            warn!(conn = self.label(), id, %method, ?timeout, "call deadline elapsed");
            Err(AppError::Timeout(format!(
                "{method} did not complete within {timeout:?}"
            )))
        }
    }

    /// Typed request: serialises `params` and deserialises the result.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus [`AppError::ProtocolViolation`] if the
    /// result payload does not match `R`.
    pub async fn request<P, R>(&self, method: Method, params: &P) -> Result<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let value = self.call(method, to_payload(params)?).await?;
        serde_json::from_value(value).map_err(|e| {
            AppError::ProtocolViolation(format!("unexpected result for {method}: {e}"))
        })
    }

    /// Send a notification; does not wait for any reply.
    ///
    /// # Errors
    ///
    /// Returns the connection's close error if it has already failed, or
    /// [`AppError::Transport`] if the writer has stopped.
    pub async fn notify(&self, method: Method, params: Value) -> Result<()> {
        self.notify_raw(method.as_str(), params).await
    }

    /// [`notify`](Self::notify) with an arbitrary wire method name.
    ///
    /// # Errors
    ///
    /// See [`notify`](Self::notify).
    pub async fn notify_raw(&self, method: &str, payload: Value) -> Result<()> {
        if let Some(err) = self.inner.pending.lock().await.closed.clone() {
            return Err(err);
        }
        self.send(Message::Notification {
            method: method.to_owned(),
            payload,
        })
        .await
    }

    async fn start_call(
        &self,
        method: &str,
        payload: Value,
    ) -> Result<(RequestId, oneshot::Receiver<Result<Value>>)> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.inner.pending.lock().await;
            if let Some(err) = &pending.closed {
                return Err(err.clone());
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            pending.waiters.insert(id, tx);
            id
        };

        debug!(conn = self.label(), id, method, "call issued");

        let msg = Message::Request {
            id,
            method: method.to_owned(),
            payload,
        };
        if let Err(err) = self.send(msg).await {
            self.inner.pending.lock().await.waiters.remove(&id);
            return Err(err);
        }
        Ok((id, rx))
    }

    async fn abandon(&self, id: RequestId) {
        let mut pending = self.inner.pending.lock().await;
        if pending.waiters.remove(&id).is_some() {
            pending.abandoned.insert(id);
        }
    }

    pub(crate) async fn send(&self, msg: Message) -> Result<()> {
        if self.inner.outbound.send(msg).await.is_ok() {
            return Ok(());
        }
        let closed = self.inner.pending.lock().await.closed.clone();
        Err(closed.unwrap_or_else(|| AppError::Transport("writer task has stopped".into())))
    }

    // ── Inbound bookkeeping (dispatcher only) ────────────────────────────────

    /// Route a response to its waiter by identifier.
    pub(crate) async fn resolve(&self, id: RequestId, outcome: std::result::Result<Value, RpcError>) {
        let mut pending = self.inner.pending.lock().await;
        if let Some(waiter) = pending.waiters.remove(&id) {
            drop(pending);
            if waiter.send(outcome.map_err(AppError::from)).is_err() {
                debug!(conn = self.label(), id, "caller dropped before response arrived");
            }
            return;
        }
        if pending.abandoned.remove(&id) {
            debug!(conn = self.label(), id, "discarding late response for abandoned call");
            return;
        }
        drop(pending);

        let issued = id > 0 && id < self.inner.next_id.load(Ordering::Relaxed);
        let violation = if issued {
            format!("duplicate response for request id {id}")
        } else {
            format!("response for request id {id} that was never issued")
        };
        self.record_violation(violation).await;
    }

    /// Record a protocol violation observed on the inbound stream.
    pub(crate) async fn record_violation(&self, violation: String) {
        error!(conn = self.label(), violation, "protocol violation");
        self.inner.violations.lock().await.push(violation);
    }

    /// Fail every pending call with `err`, refuse new ones, and stop tasks.
    pub(crate) async fn shut_down(&self, err: AppError) {
        let drained: Vec<Waiter> = {
            let mut pending = self.inner.pending.lock().await;
            if pending.closed.is_none() {
                pending.closed = Some(err.clone());
            }
            pending.abandoned.clear();
            pending.waiters.drain().map(|(_, w)| w).collect()
        };

        if !drained.is_empty() {
            warn!(
                conn = self.label(),
                pending = drained.len(),
                error = %err,
                "failing pending calls"
            );
        }
        for waiter in drained {
            let _ = waiter.send(Err(err.clone()));
        }

        self.inner.cancel.cancel();
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Close both directions. Pending calls fail with
    /// [`AppError::ConnectionClosed`]; the outbound stream is shut down so the
    /// peer observes EOF.
    pub async fn close(&self) {
        self.shut_down(AppError::ConnectionClosed(format!(
            "{} connection closed locally",
            self.label()
        )))
        .await;
        self.inner.tasks.close();
        info!(conn = self.label(), "connection closed");
    }

    /// Wait until the connection has stopped (peer EOF, failure, or close).
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Whether the connection has stopped accepting calls.
    pub async fn is_closed(&self) -> bool {
        self.inner.pending.lock().await.closed.is_some()
    }

    /// The error that closed this connection, if any.
    pub async fn close_reason(&self) -> Option<AppError> {
        self.inner.pending.lock().await.closed.clone()
    }

    /// Number of calls awaiting a response.
    pub async fn pending_calls(&self) -> usize {
        self.inner.pending.lock().await.waiters.len()
    }

    /// Protocol violations observed so far.
    pub async fn violations(&self) -> Vec<String> {
        self.inner.violations.lock().await.clone()
    }
}

async fn await_waiter(rx: oneshot::Receiver<Result<Value>>) -> Result<Value> {
    rx.await.unwrap_or_else(|_| {
        Err(AppError::ConnectionClosed(
            "connection dropped the pending call".into(),
        ))
    })
}
