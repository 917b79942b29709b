//! Inbound handler table, fixed at connection-construction time.
//!
//! A role builds its table once with [`Handlers::new`], registering one
//! closure per [`Method`] it serves, and hands the resulting
//! [`HandlerTable`] to [`Connection::spawn`](crate::rpc::connection::Connection::spawn).
//! No handler can be added after the connection starts reading, so there is
//! no window in which a request arrives before its handler exists.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::rpc::connection::Connection;
use crate::rpc::method::{CallKind, Method, Role};
use crate::{AppError, Result};

/// Boxed request handler: peer handle + params → result payload.
pub type RequestFn = Arc<dyn Fn(Connection, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Boxed notification handler: peer handle + params → unit.
pub type NotificationFn =
    Arc<dyn Fn(Connection, Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Builder for a role's [`HandlerTable`].
pub struct Handlers {
    role: Role,
    requests: HashMap<Method, RequestFn>,
    notifications: HashMap<Method, NotificationFn>,
    rejected: Vec<String>,
}

impl Handlers {
    /// Start an empty table for `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            requests: HashMap::new(),
            notifications: HashMap::new(),
            rejected: Vec::new(),
        }
    }

    /// Register the handler for a request method served by this role.
    #[must_use]
    pub fn on_request<F, Fut>(mut self, method: Method, handler: F) -> Self
    where
        F: Fn(Connection, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if self.accepts(method, CallKind::Request) {
            let handler: RequestFn = Arc::new(move |peer, params| handler(peer, params).boxed());
            self.requests.insert(method, handler);
        }
        self
    }

    /// Register the handler for a notification method served by this role.
    ///
    /// Notification handlers run one at a time on the connection's
    /// dispatcher, in frame order, and nothing else inbound is processed
    /// until each returns. Keep them short and non-blocking: no sleeps, no
    /// calls on the same connection that await a reply.
    #[must_use]
    pub fn on_notification<F, Fut>(mut self, method: Method, handler: F) -> Self
    where
        F: Fn(Connection, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.accepts(method, CallKind::Notification) {
            let handler: NotificationFn =
                Arc::new(move |peer, params| handler(peer, params).boxed());
            self.notifications.insert(method, handler);
        }
        self
    }

    /// Finish the table.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if any registration named a method that
    /// this role does not serve, or registered it with the wrong call kind.
    pub fn build(self) -> Result<HandlerTable> {
        if !self.rejected.is_empty() {
            return Err(AppError::Config(format!(
                "invalid {} handler table: {}",
                self.role,
                self.rejected.join("; ")
            )));
        }
        Ok(HandlerTable {
            role: self.role,
            requests: self.requests,
            notifications: self.notifications,
        })
    }

    fn accepts(&mut self, method: Method, kind: CallKind) -> bool {
        if method.served_by() != self.role {
            self.rejected
                .push(format!("{method} is served by the {}", method.served_by()));
            return false;
        }
        if method.call_kind() != kind {
            self.rejected
                .push(format!("{method} is a {:?}, not a {kind:?}", method.call_kind()));
            return false;
        }
        true
    }
}

/// Immutable mapping from method kind to handler for one role.
#[derive(Clone)]
pub struct HandlerTable {
    role: Role,
    requests: HashMap<Method, RequestFn>,
    notifications: HashMap<Method, NotificationFn>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("role", &self.role)
            .field("requests", &self.requests.keys().collect::<Vec<_>>())
            .field("notifications", &self.notifications.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerTable {
    /// Role this table serves.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Table that serves nothing; every inbound request is refused.
    #[must_use]
    pub fn empty(role: Role) -> Self {
        Self {
            role,
            requests: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    /// Resolve the handler for an inbound request method name.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ProtocolViolation`] if the name is unknown, belongs
    /// to the other role, or has no registered handler.
    pub fn request(&self, method: &str) -> Result<RequestFn> {
        let parsed: Method = method.parse()?;
        if parsed.served_by() != self.role {
            return Err(AppError::ProtocolViolation(format!(
                "{parsed} is not served by the {}",
                self.role
            )));
        }
        self.requests.get(&parsed).cloned().ok_or_else(|| {
            AppError::ProtocolViolation(format!("no {} handler registered for {parsed}", self.role))
        })
    }

    /// Resolve the handler for an inbound notification method name, if any.
    #[must_use]
    pub fn notification(&self, method: &str) -> Option<NotificationFn> {
        let parsed: Method = method.parse().ok()?;
        self.notifications.get(&parsed).cloned()
    }
}

/// Deserialize request/notification params into a typed payload.
///
/// # Errors
///
/// Returns [`AppError::ProtocolViolation`] if `params` do not match `T`.
pub fn parse_params<T: DeserializeOwned>(method: Method, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| AppError::ProtocolViolation(format!("invalid params for {method}: {e}")))
}

/// Serialize a typed result payload.
///
/// # Errors
///
/// Returns [`AppError::Handler`] if serialisation fails.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Handler(format!("failed to serialise payload: {e}")))
}
