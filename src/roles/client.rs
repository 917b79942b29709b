//! Mock client role and the scenario-facing client session.
//!
//! The client serves the agent's inbound methods:
//!
//! | Method                       | Behaviour                                  |
//! |------------------------------|--------------------------------------------|
//! | `session/request_permission` | Selects the first offered option           |
//! | `session/update`             | Routed to the [`SessionRouter`]            |
//! | `fs/*`, `terminal/*`         | Fails with [`AppError::NotImplemented`]    |
//!
//! A scenario that needs real file-system or terminal behaviour starts from
//! [`MockClient::handlers`] and registers its own handlers on top; later
//! registrations replace the stubs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::models::permission::{
    PermissionOutcome, RequestPermissionRequest, RequestPermissionResponse,
};
use crate::models::prompt::{CancelNotification, PromptRequest, PromptResponse, StopReason};
use crate::models::session::{NewSessionRequest, NewSessionResponse, SessionNotification, SessionUpdate};
use crate::router::SessionRouter;
use crate::rpc::connection::Connection;
use crate::rpc::handlers::{parse_params, to_payload, HandlerTable, Handlers};
use crate::rpc::method::{Method, Role};
use crate::{AppError, Result};

/// Capabilities the default client stubs out.
pub const STUBBED_METHODS: [Method; 7] = [
    Method::ReadTextFile,
    Method::WriteTextFile,
    Method::CreateTerminal,
    Method::TerminalOutput,
    Method::ReleaseTerminal,
    Method::WaitForTerminalExit,
    Method::KillTerminal,
];

/// Reference implementation of the client role.
#[derive(Debug, Clone)]
pub struct MockClient {
    router: Arc<SessionRouter>,
}

impl MockClient {
    /// Client routing session updates into `router`.
    #[must_use]
    pub fn new(router: Arc<SessionRouter>) -> Self {
        Self { router }
    }

    /// Router receiving this client's session updates.
    #[must_use]
    pub fn router(&self) -> &Arc<SessionRouter> {
        &self.router
    }

    /// Default handler set, open for extension before [`Handlers::build`].
    #[must_use]
    pub fn handlers(&self) -> Handlers {
        let router = Arc::clone(&self.router);

        let mut handlers = Handlers::new(Role::Client)
            .on_request(Method::RequestPermission, |_peer, params| async move {
                let request: RequestPermissionRequest =
                    parse_params(Method::RequestPermission, params)?;
                let response = choose_first_option(&request);
                info!(
                    session_id = request.session_id,
                    tool_call = request.tool_call.title,
                    outcome = ?response.outcome,
                    "client: permission auto-approved"
                );
                to_payload(&response)
            })
            .on_notification(Method::SessionUpdate, move |_peer, params| {
                let router = Arc::clone(&router);
                async move {
                    let notification: SessionNotification =
                        parse_params(Method::SessionUpdate, params)?;
                    router
                        .route_update(&notification.session_id, notification.update)
                        .await;
                    Ok(())
                }
            });

        for method in STUBBED_METHODS {
            handlers = handlers.on_request(method, move |_peer, _params: Value| async move {
                Err(AppError::NotImplemented(format!(
                    "{method} is not supported by the test client"
                )))
            });
        }
        handlers
    }

    /// The default handler table.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] only if the table is internally
    /// inconsistent.
    pub fn handler_table(&self) -> Result<HandlerTable> {
        self.handlers().build()
    }

    /// Create a session on the agent and register it with the router.
    ///
    /// # Errors
    ///
    /// Any failure of the `session/new` call, or
    /// [`AppError::ProtocolViolation`] if the agent reuses a live identifier.
    pub async fn start_session(&self, conn: &Connection) -> Result<ClientSession> {
        let response: NewSessionResponse = conn
            .request(Method::NewSession, &NewSessionRequest::default())
            .await?;
        self.router.register_session(&response.session_id).await?;
        info!(session_id = response.session_id, "client: session started");

        Ok(ClientSession {
            id: response.session_id,
            conn: conn.clone(),
            router: Arc::clone(&self.router),
            call_timeout: None,
        })
    }
}

/// Pick the first offered option, or cancel if none is offered.
#[must_use]
pub fn choose_first_option(request: &RequestPermissionRequest) -> RequestPermissionResponse {
    let outcome = request
        .options
        .first()
        .map_or(PermissionOutcome::Cancelled, |option| {
            PermissionOutcome::Selected {
                option_id: option.option_id.clone(),
            }
        });
    RequestPermissionResponse { outcome }
}

/// One client-side session: the surface scenario scripts drive.
#[derive(Debug, Clone)]
pub struct ClientSession {
    id: String,
    conn: Connection,
    router: Arc<SessionRouter>,
    call_timeout: Option<Duration>,
}

impl ClientSession {
    /// Agent-allocated session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bound every prompt call by `timeout`.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Send one prompt and wait for the turn to end.
    ///
    /// The reply text itself is collected by
    /// [`read_response_string`](Self::read_response_string).
    ///
    /// # Errors
    ///
    /// The agent's error (e.g. [`AppError::SessionNotFound`],
    /// [`AppError::HandlerNotConfigured`]), a connection failure, or
    /// [`AppError::Timeout`] when a call timeout is set and elapses.
    pub async fn say(&self, text: &str) -> Result<StopReason> {
        self.router.begin_turn(&self.id).await?;

        let params = to_payload(&PromptRequest::text(&self.id, text))?;
        let value = match self.call_timeout {
            Some(timeout) => {
                self.conn
                    .call_with_deadline(Method::Prompt, params, timeout)
                    .await?
            }
            None => self.conn.call(Method::Prompt, params).await?,
        };
        let response: PromptResponse = parse_params(Method::Prompt, value)?;

        self.router.end_turn(&self.id).await?;
        debug!(session_id = self.id, stop_reason = ?response.stop_reason, "client: turn ended");
        Ok(response.stop_reason)
    }

    /// Wait for the next aggregated response of this session.
    ///
    /// # Errors
    ///
    /// See [`SessionRouter::await_next_response`].
    pub async fn read_response_string(&self) -> Result<String> {
        self.router.await_next_response(&self.id).await
    }

    /// Ask the agent to stop the current turn.
    ///
    /// # Errors
    ///
    /// Returns the connection's failure if the notification cannot be sent.
    pub async fn cancel(&self) -> Result<()> {
        let params = to_payload(&CancelNotification {
            session_id: self.id.clone(),
        })?;
        self.conn.notify(Method::Cancel, params).await
    }

    /// Every update routed to this session so far.
    ///
    /// # Errors
    ///
    /// [`AppError::SessionNotFound`] once the session is released.
    pub async fn updates(&self) -> Result<Vec<SessionUpdate>> {
        self.router.updates(&self.id).await
    }
}
