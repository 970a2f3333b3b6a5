//! Core scheduling abstractions and capacity accounting.

pub mod audit;
pub mod device;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod resources;
pub mod scheduler;
pub mod session;
pub mod task;

pub use audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use device::{DeviceSpec, DeviceType};
pub use engine::{EngineOptions, ExecutionEngine, SessionSummary};
pub use error::{AppResult, SchedulerError};
pub use executor::{FailureKind, OperationTask, TaskFailure, TaskOutput};
pub use ledger::{DeviceUsage, ResourceContext, ResourceLedger};
pub use resources::{Resources, COMPUTE_SLOTS, MEMORY};
pub use scheduler::{FairScheduler, FifoScheduler, ScheduleRound, Scheduler};
pub use session::{SessionChangeSet, SessionHandle, SessionItem, SessionOptions, SessionRef, SessionState};
pub use task::{RetryDecision, TaskCompletion, TaskItem, TaskResult, TaskState, DEFAULT_MAX_FAILURES};
