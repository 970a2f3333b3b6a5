//! Error types for scheduler, engine, and dispatch operations.

use thiserror::Error;

use crate::core::device::DeviceSpec;

/// Errors produced by scheduler components.
///
/// Variants follow the failure taxonomy of the dispatch layer: transport
/// faults are dropped and logged, request-shape faults are answered with an
/// error reply, admission denials are retried locally, and execution failures
/// are retried or surfaced depending on their classification.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Framing or parsing failure at the transport boundary.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// No handler is registered for the request type.
    #[error("unknown request type `{0}`")]
    UnknownRequestType(String),
    /// The referenced session does not exist or no longer accepts work.
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    /// Not enough remaining capacity on the device right now.
    #[error("admission denied on {0}")]
    AdmissionDenied(DeviceSpec),
    /// No compatible device could ever satisfy the task's demand.
    #[error("task {0} is unschedulable: {1}")]
    Unschedulable(u64, String),
    /// Transient execution failure, eligible for retry.
    #[error("retryable execution failure: {0}")]
    RetryableExecution(String),
    /// Execution failure that is not retried.
    #[error("fatal execution failure: {0}")]
    FatalExecution(String),
    /// A resource grant was released more than once or never issued.
    #[error("resource context {0} already released")]
    DoubleRelease(u64),
    /// The device is not part of the ledger.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceSpec),
    /// The owning session aborted after a fatal failure.
    #[error("session `{0}` aborted")]
    SessionAborted(String),
    /// The task was dropped before reaching a terminal state.
    #[error("task abandoned before completion")]
    TaskAbandoned,
    /// The request body did not match the handler's expected shape.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Transport-specific failure with context.
    #[error("transport error: {0}")]
    Transport(String),
    /// The transport has been closed and will not yield more messages.
    #[error("transport closed")]
    TransportClosed,
    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),
}

impl SchedulerError {
    /// Stable machine-readable code used in error reply bodies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "malformed_message",
            Self::UnknownRequestType(_) => "unknown_request_type",
            Self::SessionNotFound(_) => "session_not_found",
            Self::AdmissionDenied(_) => "admission_denied",
            Self::Unschedulable(..) => "unschedulable",
            Self::RetryableExecution(_) => "retryable_execution_failure",
            Self::FatalExecution(_) => "fatal_execution_failure",
            Self::DoubleRelease(_) => "double_release",
            Self::UnknownDevice(_) => "unknown_device",
            Self::SessionAborted(_) => "session_aborted",
            Self::TaskAbandoned => "task_abandoned",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Transport(_) => "transport",
            Self::TransportClosed => "transport_closed",
            Self::Config(_) => "config",
        }
    }

    /// Whether the condition is transient and recovered without surfacing.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::AdmissionDenied(_) | Self::RetryableExecution(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
