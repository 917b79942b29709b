//! Session router: per-session update logs and aggregated-response delivery.
//!
//! The router owns every session's state behind one mutex. Inbound
//! `session/update` notifications are routed here by the client role; scenario
//! code waits for the next aggregated response with
//! [`SessionRouter::await_next_response`].
//!
//! # Aggregation
//!
//! When a streamed reply counts as complete is decided by
//! [`AggregationPolicy`]:
//!
//! - [`FirstChunk`](AggregationPolicy::FirstChunk): the first reply chunk
//!   after [`begin_turn`](SessionRouter::begin_turn) is the whole response;
//!   later chunks in the same turn are logged only.
//! - [`EndOfTurn`](AggregationPolicy::EndOfTurn): reply chunks accumulate
//!   until [`end_turn`](SessionRouter::end_turn), which delivers their
//!   concatenation.
//!
//! Completed responses that nobody is waiting for yet are queued, so a wait
//! issued after the update arrived still observes it.

use std::collections::{HashMap, VecDeque};

use serde::Deserialize;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::session::SessionUpdate;
use crate::{AppError, Result};

/// Rule deciding when streamed updates form a complete response.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// First reply chunk of a turn is the complete response.
    #[default]
    FirstChunk,
    /// Reply chunks accumulate until the turn ends.
    EndOfTurn,
}

type ResponseWaiter = oneshot::Sender<Result<String>>;

#[derive(Debug, Default)]
struct SessionState {
    log: Vec<SessionUpdate>,
    buffer: String,
    delivered: bool,
    ready: VecDeque<String>,
    waiter: Option<ResponseWaiter>,
}

impl SessionState {
    fn complete(&mut self, session_id: &str, text: String) {
        if let Some(waiter) = self.waiter.take() {
            match waiter.send(Ok(text)) {
                Ok(()) => {
                    debug!(session_id, "router: response delivered to waiter");
                    return;
                }
                Err(Ok(text)) => self.ready.push_back(text),
                Err(Err(_)) => {}
            }
        } else {
            self.ready.push_back(text);
        }
        debug!(session_id, queued = self.ready.len(), "router: response queued");
    }

    fn waiter_busy(&self) -> bool {
        self.waiter.as_ref().is_some_and(|w| !w.is_closed())
    }
}

#[derive(Debug, Default)]
struct Table {
    sessions: HashMap<String, SessionState>,
    closed: Option<AppError>,
}

/// Maps session identifiers to session-local state.
#[derive(Debug, Default)]
pub struct SessionRouter {
    policy: AggregationPolicy,
    table: Mutex<Table>,
}

impl SessionRouter {
    /// Create an empty router with the given aggregation policy.
    #[must_use]
    pub fn new(policy: AggregationPolicy) -> Self {
        Self {
            policy,
            table: Mutex::new(Table::default()),
        }
    }

    /// Aggregation policy in effect.
    #[must_use]
    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// Allocate a fresh identifier and register empty state for it.
    ///
    /// # Errors
    ///
    /// Returns the close error if the router has been closed.
    pub async fn create_session(&self) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        self.register_session(&session_id).await?;
        Ok(session_id)
    }

    /// Register empty state for an identifier allocated by the peer.
    ///
    /// # Errors
    ///
    /// - Returns the close error if the router has been closed.
    /// - [`AppError::ProtocolViolation`] if the identifier is already live.
    pub async fn register_session(&self, session_id: &str) -> Result<()> {
        let mut table = self.table.lock().await;
        if let Some(err) = &table.closed {
            return Err(err.clone());
        }
        if table.sessions.contains_key(session_id) {
            return Err(AppError::ProtocolViolation(format!(
                "session '{session_id}' is already registered"
            )));
        }
        table
            .sessions
            .insert(session_id.to_owned(), SessionState::default());
        debug!(session_id, "router: session registered");
        Ok(())
    }

    /// Route one streamed update to its session.
    ///
    /// Updates for unknown sessions are logged and dropped: the peer may
    /// reference a session that has already been released.
    pub async fn route_update(&self, session_id: &str, update: SessionUpdate) {
        let mut table = self.table.lock().await;
        let Some(state) = table.sessions.get_mut(session_id) else {
            warn!(session_id, "router: update for unknown session dropped");
            return;
        };

        if let Some(text) = update.reply_text() {
            match self.policy {
                AggregationPolicy::FirstChunk => {
                    if !state.delivered {
                        state.delivered = true;
                        let text = text.to_owned();
                        state.complete(session_id, text);
                    }
                }
                AggregationPolicy::EndOfTurn => state.buffer.push_str(text),
            }
        }
        state.log.push(update);
    }

    /// Mark the start of a prompt turn.
    ///
    /// # Errors
    ///
    /// [`AppError::SessionNotFound`] if the session is not registered.
    pub async fn begin_turn(&self, session_id: &str) -> Result<()> {
        let mut table = self.table.lock().await;
        let state = session_mut(&mut table, session_id)?;
        state.delivered = false;
        state.buffer.clear();
        Ok(())
    }

    /// Mark the end of a prompt turn; under
    /// [`EndOfTurn`](AggregationPolicy::EndOfTurn) this delivers the
    /// accumulated reply.
    ///
    /// # Errors
    ///
    /// [`AppError::SessionNotFound`] if the session is not registered.
    pub async fn end_turn(&self, session_id: &str) -> Result<()> {
        let mut table = self.table.lock().await;
        let state = session_mut(&mut table, session_id)?;
        if self.policy == AggregationPolicy::EndOfTurn {
            let text = std::mem::take(&mut state.buffer);
            state.complete(session_id, text);
        }
        Ok(())
    }

    /// Wait for the next complete response routed to `session_id`.
    ///
    /// Only one wait per session may be outstanding; a wait whose future was
    /// dropped frees the slot.
    ///
    /// # Errors
    ///
    /// - [`AppError::SessionNotFound`] if the session is not registered, or
    ///   is released while waiting.
    /// - [`AppError::ResourceBusy`] if another wait is outstanding.
    /// - The close error if the router is closed while waiting.
    pub async fn await_next_response(&self, session_id: &str) -> Result<String> {
        let rx = {
            let mut table = self.table.lock().await;
            let state = session_mut(&mut table, session_id)?;
            if let Some(text) = state.ready.pop_front() {
                return Ok(text);
            }
            if state.waiter_busy() {
                return Err(AppError::ResourceBusy(format!(
                    "session '{session_id}' already has an outstanding response wait"
                )));
            }
            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };

        rx.await.unwrap_or_else(|_| {
            Err(AppError::SessionNotFound(format!(
                "session '{session_id}' was released while waiting"
            )))
        })
    }

    /// Ordered log of every update routed to `session_id`.
    ///
    /// # Errors
    ///
    /// [`AppError::SessionNotFound`] if the session is not registered.
    pub async fn updates(&self, session_id: &str) -> Result<Vec<SessionUpdate>> {
        let mut table = self.table.lock().await;
        Ok(session_mut(&mut table, session_id)?.log.clone())
    }

    /// Whether `session_id` is registered.
    pub async fn contains(&self, session_id: &str) -> bool {
        self.table.lock().await.sessions.contains_key(session_id)
    }

    /// Drop a session's state; an outstanding wait fails with
    /// [`AppError::SessionNotFound`]. Returns whether the session existed.
    pub async fn release(&self, session_id: &str) -> bool {
        let removed = self.table.lock().await.sessions.remove(session_id);
        let Some(state) = removed else {
            return false;
        };
        if let Some(waiter) = state.waiter {
            let _ = waiter.send(Err(AppError::SessionNotFound(format!(
                "session '{session_id}' was released"
            ))));
        }
        debug!(session_id, "router: session released");
        true
    }

    /// Release every session, failing outstanding waits with `err`, and
    /// refuse new registrations.
    pub async fn close(&self, err: AppError) {
        let sessions = {
            let mut table = self.table.lock().await;
            if table.closed.is_none() {
                table.closed = Some(err.clone());
            }
            std::mem::take(&mut table.sessions)
        };
        for (session_id, state) in sessions {
            if let Some(waiter) = state.waiter {
                debug!(session_id, "router: failing outstanding wait on close");
                let _ = waiter.send(Err(err.clone()));
            }
        }
    }
}

fn session_mut<'a>(table: &'a mut Table, session_id: &str) -> Result<&'a mut SessionState> {
    if let Some(err) = &table.closed {
        return Err(err.clone());
    }
    table
        .sessions
        .get_mut(session_id)
        .ok_or_else(|| AppError::SessionNotFound(format!("unknown session '{session_id}'")))
}
