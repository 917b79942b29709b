//! Mock agent role.
//!
//! Serves `initialize`, `session/new`, `session/prompt`, and
//! `session/cancel`. Each session moves through
//! `Created → AwaitingPrompt → Responding → AwaitingPrompt … → Closed`.
//!
//! A prompt turn invokes the injected [`PromptHandler`], emits exactly one
//! `agent_message_chunk` update carrying its result, then answers the prompt
//! with stop reason `end_turn`. The handler is a builder-time dependency;
//! an agent built without one still answers prompts, with
//! [`AppError::HandlerNotConfigured`].
//!
//! Cancellation notifications are accepted and logged but do not interrupt
//! a running turn: mock turns are short and complete on their own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::content::ContentBlock;
use crate::models::handshake::{Implementation, InitializeRequest};
use crate::models::permission::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, RequestPermissionRequest,
    RequestPermissionResponse, ToolCallRef,
};
use crate::models::prompt::{CancelNotification, PromptRequest, PromptResponse, StopReason};
use crate::models::session::{NewSessionResponse, SessionNotification, SessionUpdate};
use crate::rpc::connection::Connection;
use crate::rpc::handlers::{parse_params, to_payload, HandlerTable, Handlers};
use crate::rpc::handshake::answer_initialize;
use crate::rpc::method::{Method, Role};
use crate::{AppError, Result};

/// Injected prompt seam: message text → response text (or failure).
pub type PromptHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Wrap an async closure as a [`PromptHandler`].
pub fn prompt_handler<F, Fut>(handler: F) -> PromptHandler
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    Arc::new(move |text| handler(text).boxed())
}

/// Per-session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSessionState {
    /// Allocated, not yet ready.
    Created,
    /// Ready for the next prompt.
    AwaitingPrompt,
    /// A prompt turn is running.
    Responding,
    /// The agent has shut down.
    Closed,
}

/// Builder for [`MockAgent`].
#[derive(Default)]
pub struct MockAgentBuilder {
    handler: Option<PromptHandler>,
    require_permission: bool,
    name: Option<String>,
}

impl MockAgentBuilder {
    /// Inject the prompt handler.
    #[must_use]
    pub fn prompt_handler(mut self, handler: PromptHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Ask the client for permission before each turn.
    #[must_use]
    pub fn require_permission(mut self, require: bool) -> Self {
        self.require_permission = require;
        self
    }

    /// Name reported in the `initialize` answer.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Finish the agent.
    #[must_use]
    pub fn build(self) -> Arc<MockAgent> {
        Arc::new(MockAgent {
            handler: self.handler,
            require_permission: self.require_permission,
            info: Implementation::this_crate(self.name.as_deref().unwrap_or("harness-mock-agent")),
            sessions: Mutex::new(HashMap::new()),
        })
    }
}

/// Reference implementation of the agent role.
pub struct MockAgent {
    handler: Option<PromptHandler>,
    require_permission: bool,
    info: Implementation,
    sessions: Mutex<HashMap<String, AgentSessionState>>,
}

impl std::fmt::Debug for MockAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAgent")
            .field("handler_configured", &self.handler.is_some())
            .field("require_permission", &self.require_permission)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl MockAgent {
    /// Start building a mock agent.
    #[must_use]
    pub fn builder() -> MockAgentBuilder {
        MockAgentBuilder::default()
    }

    /// The agent role's handler table, bound to this agent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] only if the table is internally
    /// inconsistent.
    pub fn handler_table(self: &Arc<Self>) -> Result<HandlerTable> {
        let init = Arc::clone(self);
        let new_session = Arc::clone(self);
        let prompt = Arc::clone(self);
        let cancel = Arc::clone(self);

        Handlers::new(Role::Agent)
            .on_request(Method::Initialize, move |_peer, params| {
                let agent = Arc::clone(&init);
                async move {
                    let request: InitializeRequest = parse_params(Method::Initialize, params)?;
                    info!(client = request.client_info.name, "agent: initialize received");
                    to_payload(&answer_initialize(&request, agent.info.clone())?)
                }
            })
            .on_request(Method::NewSession, move |_peer, _params| {
                let agent = Arc::clone(&new_session);
                async move { to_payload(&agent.new_session().await) }
            })
            .on_request(Method::Prompt, move |peer, params| {
                let agent = Arc::clone(&prompt);
                async move {
                    let request: PromptRequest = parse_params(Method::Prompt, params)?;
                    to_payload(&agent.prompt(&peer, request).await?)
                }
            })
            .on_notification(Method::Cancel, move |_peer, params| {
                let agent = Arc::clone(&cancel);
                async move {
                    let notification: CancelNotification = parse_params(Method::Cancel, params)?;
                    agent.cancel(&notification).await;
                    Ok(())
                }
            })
            .build()
    }

    /// Current state of a session, if it exists.
    pub async fn session_state(&self, session_id: &str) -> Option<AgentSessionState> {
        self.sessions.lock().await.get(session_id).copied()
    }

    /// Number of sessions ever created and not yet closed.
    pub async fn open_sessions(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| **s != AgentSessionState::Closed)
            .count()
    }

    /// Move every session to `Closed`.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for (session_id, state) in sessions.iter_mut() {
            transition(session_id, state, AgentSessionState::Closed);
        }
    }

    async fn new_session(&self) -> NewSessionResponse {
        let session_id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.lock().await;
        let state = sessions
            .entry(session_id.clone())
            .or_insert(AgentSessionState::Created);
        transition(&session_id, state, AgentSessionState::AwaitingPrompt);
        info!(session_id, "agent: session created");
        NewSessionResponse { session_id }
    }

    async fn prompt(&self, peer: &Connection, request: PromptRequest) -> Result<PromptResponse> {
        let session_id = request.session_id.clone();
        let handler = {
            let mut sessions = self.sessions.lock().await;
            let state = match sessions.get_mut(&session_id) {
                None | Some(AgentSessionState::Closed) => {
                    return Err(AppError::SessionNotFound(format!(
                        "unknown session '{session_id}'"
                    )))
                }
                Some(AgentSessionState::Responding) => {
                    return Err(AppError::ResourceBusy(format!(
                        "session '{session_id}' is already responding"
                    )))
                }
                Some(state) => state,
            };
            let Some(handler) = self.handler.clone() else {
                return Err(AppError::HandlerNotConfigured(format!(
                    "prompt for session '{session_id}' arrived before a prompt handler was set"
                )));
            };
            transition(&session_id, state, AgentSessionState::Responding);
            handler
        };

        let outcome = self.run_turn(peer, &request, &handler).await;

        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(&session_id) {
            if *state == AgentSessionState::Responding {
                transition(&session_id, state, AgentSessionState::AwaitingPrompt);
            }
        }
        outcome
    }

    async fn run_turn(
        &self,
        peer: &Connection,
        request: &PromptRequest,
        handler: &PromptHandler,
    ) -> Result<PromptResponse> {
        let session_id = &request.session_id;

        if self.require_permission && !self.ask_permission(peer, request).await? {
            info!(session_id, "agent: permission refused, ending turn");
            return Ok(PromptResponse {
                stop_reason: StopReason::Refusal,
            });
        }

        let reply = handler(request.joined_text()).await?;
        debug!(session_id, reply_len = reply.len(), "agent: prompt handler replied");

        let update = SessionNotification {
            session_id: session_id.clone(),
            update: SessionUpdate::AgentMessageChunk {
                content: ContentBlock::text(reply),
            },
        };
        peer.notify(Method::SessionUpdate, to_payload(&update)?).await?;

        Ok(PromptResponse {
            stop_reason: StopReason::EndTurn,
        })
    }

    async fn ask_permission(&self, peer: &Connection, request: &PromptRequest) -> Result<bool> {
        let options = vec![
            PermissionOption {
                option_id: "allow-once".into(),
                name: "Allow".into(),
                kind: PermissionOptionKind::AllowOnce,
            },
            PermissionOption {
                option_id: "reject-once".into(),
                name: "Reject".into(),
                kind: PermissionOptionKind::RejectOnce,
            },
        ];
        let ask = RequestPermissionRequest {
            session_id: request.session_id.clone(),
            tool_call: ToolCallRef {
                tool_call_id: Uuid::new_v4().to_string(),
                title: "respond to prompt".into(),
            },
            options: options.clone(),
        };

        let answer: RequestPermissionResponse =
            peer.request(Method::RequestPermission, &ask).await?;

        match answer.outcome {
            PermissionOutcome::Cancelled => Ok(false),
            PermissionOutcome::Selected { option_id } => options
                .iter()
                .find(|o| o.option_id == option_id)
                .map(|o| o.kind.is_allow())
                .ok_or_else(|| {
                    AppError::ProtocolViolation(format!(
                        "client selected unknown permission option '{option_id}'"
                    ))
                }),
        }
    }

    async fn cancel(&self, notification: &CancelNotification) {
        let state = self.session_state(&notification.session_id).await;
        if state.is_none() {
            warn!(
                session_id = notification.session_id,
                "agent: cancel for unknown session ignored"
            );
        } else {
            info!(
                session_id = notification.session_id,
                ?state,
                "agent: cancel received; mock turns run to completion"
            );
        }
    }
}

fn transition(session_id: &str, state: &mut AgentSessionState, next: AgentSessionState) {
    debug!(session_id, from = ?state, to = ?next, "agent: session state transition");
    *state = next;
}
