//! Built-in request handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::core::{OperationTask, SchedulerError, SessionOptions};
use crate::runtime::api::{
    CloseSessionReply, CreateSessionReply, CreateSessionRequest, DeviceListReply, ResetReply,
    TaskRunReply,
};
use crate::runtime::registry::{HandlerContext, HandlerRegistry, HandlerScope, RequestHandler};

/// Open a session.
pub const SESSION_CREATE: &str = "session.create";
/// Begin closing a session.
pub const SESSION_CLOSE: &str = "session.close";
/// Describe a session.
pub const SESSION_STATUS: &str = "session.status";
/// List devices.
pub const DEVICES_LIST: &str = "devices.list";
/// Close every session.
pub const INSTANCE_RESET: &str = "instance.reset";
/// Run one operation in a session.
pub const TASK_RUN: &str = "task.run";

/// Builds operations from `task.run` bodies.
pub trait TaskFactory: Send + Sync {
    /// Construct the operation described by `body`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` when the body does not describe a known operation.
    fn build(&self, body: &Value) -> Result<Box<dyn OperationTask>, SchedulerError>;
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T, SchedulerError> {
    serde_json::from_value(body).map_err(|e| SchedulerError::InvalidRequest(e.to_string()))
}

fn encode<T: Serialize>(reply: &T) -> Result<Value, SchedulerError> {
    serde_json::to_value(reply).map_err(|e| SchedulerError::InvalidRequest(e.to_string()))
}

struct CreateSession;

#[async_trait]
impl RequestHandler for CreateSession {
    async fn handle(&self, ctx: HandlerContext, body: Value) -> Result<Value, SchedulerError> {
        let req: CreateSessionRequest = decode(body)?;
        let handle = ctx.engine.create_session(SessionOptions {
            abort_on_failure: req.abort_on_failure,
        });
        encode(&CreateSessionReply {
            session_handle: handle,
        })
    }
}

struct CloseSession;

#[async_trait]
impl RequestHandler for CloseSession {
    async fn handle(&self, ctx: HandlerContext, _body: Value) -> Result<Value, SchedulerError> {
        let handle = ctx.session()?.clone();
        ctx.engine.close_session(&handle)?;
        let state = ctx.engine.session_state(&handle);
        encode(&CloseSessionReply {
            session_handle: handle,
            state,
        })
    }
}

struct SessionStatus;

#[async_trait]
impl RequestHandler for SessionStatus {
    async fn handle(&self, ctx: HandlerContext, _body: Value) -> Result<Value, SchedulerError> {
        let handle = ctx.session()?;
        let summary = ctx
            .engine
            .session_summary(handle)
            .ok_or_else(|| SchedulerError::SessionNotFound(handle.to_string()))?;
        encode(&summary)
    }
}

struct ListDevices;

#[async_trait]
impl RequestHandler for ListDevices {
    async fn handle(&self, ctx: HandlerContext, _body: Value) -> Result<Value, SchedulerError> {
        encode(&DeviceListReply {
            policy: ctx.engine.policy().to_string(),
            devices: ctx.engine.devices(),
        })
    }
}

struct ResetInstance;

#[async_trait]
impl RequestHandler for ResetInstance {
    async fn handle(&self, ctx: HandlerContext, _body: Value) -> Result<Value, SchedulerError> {
        let closed = ctx.engine.reset();
        info!(closed, seq = ctx.seq, "instance reset");
        encode(&ResetReply { closed })
    }
}

struct RunTask {
    factory: Arc<dyn TaskFactory>,
}

#[async_trait]
impl RequestHandler for RunTask {
    async fn handle(&self, ctx: HandlerContext, body: Value) -> Result<Value, SchedulerError> {
        let handle = ctx.session()?;
        let op = self.factory.build(&body)?;
        let done = ctx.engine.submit(handle, op)?;
        let task_id = done.task_id();
        let output = done.wait().await?;
        encode(&TaskRunReply { task_id, output })
    }
}

/// Register every built-in handler. `task.run` builds operations with
/// `factory`.
pub fn register_builtins(registry: &mut HandlerRegistry, factory: Arc<dyn TaskFactory>) {
    registry
        .register(SESSION_CREATE, HandlerScope::Instance, CreateSession)
        .register(DEVICES_LIST, HandlerScope::Instance, ListDevices)
        .register(INSTANCE_RESET, HandlerScope::Instance, ResetInstance)
        .register(SESSION_CLOSE, HandlerScope::Session, CloseSession)
        .register(SESSION_STATUS, HandlerScope::Session, SessionStatus)
        .register(TASK_RUN, HandlerScope::Session, RunTask { factory });
}

impl HandlerRegistry {
    /// Registry holding the built-in handlers.
    #[must_use]
    pub fn with_builtins(factory: Arc<dyn TaskFactory>) -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry, factory);
        registry
    }
}
