//! Request-type to handler table.
//!
//! Built once at startup and shared read-only with the pipeline. Lookup is a
//! single hash lookup; session-scoped handlers are only reached when the body
//! names a session in the engine's live set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::core::{ExecutionEngine, SchedulerError, SessionHandle};
use crate::runtime::frames::Envelope;

/// Body field carrying the session handle for session-scoped requests.
pub const SESSION_FIELD: &str = "session_handle";

/// Whether a handler needs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerScope {
    /// Runs without a session.
    Instance,
    /// Requires `session_handle` naming a live session.
    Session,
}

/// What a handler gets besides the request body.
#[derive(Clone)]
pub struct HandlerContext {
    /// Engine the request operates on.
    pub engine: ExecutionEngine,
    /// Resolved session for session-scoped handlers.
    pub session: Option<SessionHandle>,
    /// Request sequence number.
    pub seq: u64,
}

impl HandlerContext {
    /// The resolved session.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` when called from an instance-scoped handler.
    pub fn session(&self) -> Result<&SessionHandle, SchedulerError> {
        self.session
            .as_ref()
            .ok_or_else(|| SchedulerError::InvalidRequest("handler requires a session".into()))
    }
}

/// Asynchronous request handler.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the reply body, or the error to reply with.
    async fn handle(&self, ctx: HandlerContext, body: Value) -> Result<Value, SchedulerError>;
}

#[async_trait]
impl<T: RequestHandler + ?Sized> RequestHandler for Arc<T> {
    async fn handle(&self, ctx: HandlerContext, body: Value) -> Result<Value, SchedulerError> {
        (**self).handle(ctx, body).await
    }
}

/// One registry entry.
#[derive(Clone)]
pub struct Registration {
    /// Request type served.
    pub request_type: String,
    /// Session requirement.
    pub scope: HandlerScope,
    /// Handler implementation.
    pub handler: Arc<dyn RequestHandler>,
}

/// A resolved request ready to run.
pub struct Resolved {
    /// Handler to invoke.
    pub handler: Arc<dyn RequestHandler>,
    /// Context to invoke it with.
    pub ctx: HandlerContext,
    /// Decoded body.
    pub body: Value,
}

/// Handler table keyed by request type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Registration>,
}

impl HandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `request_type`, replacing any previous entry.
    pub fn register(
        &mut self,
        request_type: impl Into<String>,
        scope: HandlerScope,
        handler: impl RequestHandler + 'static,
    ) -> &mut Self {
        let request_type = request_type.into();
        let registration = Registration {
            request_type: request_type.clone(),
            scope,
            handler: Arc::new(handler),
        };
        if self.handlers.insert(request_type.clone(), registration).is_some() {
            warn!(request_type = %request_type, "handler replaced");
        }
        self
    }

    /// Entry for `request_type`.
    #[must_use]
    pub fn lookup(&self, request_type: &str) -> Option<&Registration> {
        self.handlers.get(request_type)
    }

    /// Registered request types, sorted.
    #[must_use]
    pub fn request_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Pick the handler for a request and resolve its session.
    ///
    /// # Errors
    ///
    /// `UnknownRequestType` for unregistered types, `InvalidRequest` when a
    /// session-scoped body lacks `session_handle`, and `SessionNotFound`
    /// when the handle is not in the live set.
    pub fn resolve(
        &self,
        engine: &ExecutionEngine,
        envelope: &Envelope,
        body: Value,
    ) -> Result<Resolved, SchedulerError> {
        let registration = self
            .lookup(&envelope.request_type)
            .ok_or_else(|| SchedulerError::UnknownRequestType(envelope.request_type.clone()))?;

        let session = match registration.scope {
            HandlerScope::Instance => None,
            HandlerScope::Session => {
                let handle = body
                    .get(SESSION_FIELD)
                    .and_then(Value::as_str)
                    .map(SessionHandle::from)
                    .ok_or_else(|| {
                        SchedulerError::InvalidRequest(format!("missing `{SESSION_FIELD}`"))
                    })?;
                if engine.session_state(&handle).is_none() {
                    return Err(SchedulerError::SessionNotFound(handle.to_string()));
                }
                Some(handle)
            }
        };

        Ok(Resolved {
            handler: Arc::clone(&registration.handler),
            ctx: HandlerContext {
                engine: engine.clone(),
                session,
                seq: envelope.seq,
            },
            body,
        })
    }
}
