//! Request and reply body models for the built-in handlers.

use serde::{Deserialize, Serialize};

use crate::core::{DeviceUsage, SchedulerError, SessionHandle, SessionState};

/// `session.create` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Abort the session on its first fatal task failure.
    #[serde(default)]
    pub abort_on_failure: bool,
}

/// `session.create.reply` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionReply {
    /// Handle of the new session.
    pub session_handle: SessionHandle,
}

/// `session.close.reply` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSessionReply {
    /// Session being closed.
    pub session_handle: SessionHandle,
    /// State right after the request; `None` when already removed.
    pub state: Option<SessionState>,
}

/// `devices.list.reply` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceListReply {
    /// Active scheduling policy.
    pub policy: String,
    /// Per-device capacity and availability.
    pub devices: Vec<DeviceUsage>,
}

/// `instance.reset.reply` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetReply {
    /// Sessions that began closing.
    pub closed: usize,
}

/// `task.run.reply` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunReply {
    /// Engine-assigned task id.
    pub task_id: u64,
    /// Operation output.
    pub output: serde_json::Value,
}

/// Body of every `error` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&SchedulerError> for ErrorReply {
    fn from(err: &SchedulerError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Reply type used for failures.
pub const ERROR_REPLY_TYPE: &str = "error";

/// Reply type for a successful `request_type`.
#[must_use]
pub fn reply_type(request_type: &str) -> String {
    format!("{request_type}.reply")
}
