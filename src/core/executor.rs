//! Execution seam to the operator library.
//!
//! The scheduler never looks inside an operation. It only asks where the
//! operation can run, how much it will use there, and then drives
//! `prepare` followed by `run`.

use std::fmt;

use async_trait::async_trait;

use crate::core::device::{DeviceSpec, DeviceType};
use crate::core::ledger::ResourceContext;
use crate::core::resources::Resources;

/// Result payload of a finished operation, forwarded verbatim to the caller.
pub type TaskOutput = serde_json::Value;

/// Classification of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient (for example memory pressure); the task may be retried.
    Retryable,
    /// Permanent; surfaced to the session immediately.
    Fatal,
}

/// Failure reported by `prepare` or `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Retry classification.
    pub kind: FailureKind,
    /// Human-readable reason.
    pub message: String,
}

impl TaskFailure {
    /// A transient failure.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    /// A permanent failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    /// Whether the failure may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Retryable
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A unit of schedulable work supplied by the execution library.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_session_scheduler::core::{
///     DeviceSpec, DeviceType, OperationTask, ResourceContext, Resources, TaskFailure, TaskOutput,
/// };
///
/// struct MatMul { bytes: u64 }
///
/// #[async_trait]
/// impl OperationTask for MatMul {
///     fn supported_device_types(&self) -> &[DeviceType] {
///         &[DeviceType::Gpu, DeviceType::Cpu]
///     }
///     fn estimated_usage(&self, _spec: DeviceSpec) -> Resources {
///         Resources::zero().with("memory", self.bytes)
///     }
///     fn prepare(&mut self, _ctx: &ResourceContext) -> Result<(), TaskFailure> {
///         Ok(())
///     }
///     async fn run(&mut self) -> Result<TaskOutput, TaskFailure> {
///         Ok(serde_json::json!({"done": true}))
///     }
/// }
/// ```
#[async_trait]
pub trait OperationTask: Send + 'static {
    /// Short label used in logs and debug output.
    fn describe(&self) -> String {
        "operation".to_string()
    }

    /// Compatible device types in preference order.
    fn supported_device_types(&self) -> &[DeviceType];

    /// Estimated resource usage if placed on `spec`.
    fn estimated_usage(&self, spec: DeviceSpec) -> Resources;

    /// Bind to the granted device. Must not perform long-running work.
    ///
    /// # Errors
    ///
    /// Returns a classified failure if the operation cannot be bound.
    fn prepare(&mut self, context: &ResourceContext) -> Result<(), TaskFailure>;

    /// Execute the operation. The returned future resolves exactly once.
    ///
    /// # Errors
    ///
    /// Returns a classified failure when execution does not succeed.
    async fn run(&mut self) -> Result<TaskOutput, TaskFailure>;
}
