//! Scheduler-side wrapper driving an operation through its lifecycle.
//!
//! `Created → Prepared → Running → {Completed, Failed}`; a retryable failure
//! sends the task back to `Created` at the front of its session's queue.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::oneshot;

use crate::core::device::{DeviceSpec, DeviceType};
use crate::core::error::SchedulerError;
use crate::core::executor::{OperationTask, TaskFailure, TaskOutput};
use crate::core::ledger::ResourceContext;
use crate::core::resources::Resources;
use crate::core::session::SessionHandle;

/// Default number of retries granted to a retryable failure.
pub const DEFAULT_MAX_FAILURES: u32 = 2;

/// Terminal result delivered to whoever submitted the task.
pub type TaskResult = Result<TaskOutput, SchedulerError>;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, no grant held.
    Created,
    /// Bound to a granted device.
    Prepared,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a fatal error.
    Failed,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue at the front of the session's queue.
    Retry,
    /// Surface the failure.
    GiveUp,
}

/// A queued or in-flight operation belonging to one session.
///
/// The session is referenced by handle only; the engine resolves it through
/// its session table, so a task never keeps a torn-down session alive.
pub struct TaskItem {
    id: u64,
    session: SessionHandle,
    op: Box<dyn OperationTask>,
    usage_cache: HashMap<DeviceSpec, Resources>,
    failures: u32,
    max_failures: u32,
    state: TaskState,
    context: Option<ResourceContext>,
    done: Option<oneshot::Sender<TaskResult>>,
}

impl TaskItem {
    /// Wrap an operation. Returns the item and the handle its result arrives on.
    pub fn new(
        id: u64,
        session: SessionHandle,
        op: Box<dyn OperationTask>,
        max_failures: u32,
    ) -> (Self, TaskCompletion) {
        let (tx, rx) = oneshot::channel();
        let item = Self {
            id,
            session,
            op,
            usage_cache: HashMap::new(),
            failures: 0,
            max_failures,
            state: TaskState::Created,
            context: None,
            done: Some(tx),
        };
        (item, TaskCompletion { task_id: id, rx })
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Owning session.
    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    /// Failed attempts so far.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Compatible device types in preference order.
    #[must_use]
    pub fn supported_device_types(&self) -> Vec<DeviceType> {
        self.op.supported_device_types().to_vec()
    }

    /// Estimated usage on `spec`, memoized per device.
    pub fn estimated_usage(&mut self, spec: DeviceSpec) -> Resources {
        if let Some(cached) = self.usage_cache.get(&spec) {
            return cached.clone();
        }
        let usage = self.op.estimated_usage(spec);
        self.usage_cache.insert(spec, usage.clone());
        usage
    }

    /// Grant currently held, if any.
    #[must_use]
    pub const fn context(&self) -> Option<&ResourceContext> {
        self.context.as_ref()
    }

    pub(crate) fn bind(&mut self, context: ResourceContext) {
        debug_assert!(self.context.is_none(), "task admitted twice");
        self.context = Some(context);
    }

    pub(crate) fn take_context(&mut self) -> Option<ResourceContext> {
        self.context.take()
    }

    /// Bind the operation to its granted device.
    ///
    /// # Errors
    ///
    /// Returns the classified failure reported by the operation, or a fatal
    /// failure when no grant is bound.
    pub fn prepare(&mut self) -> Result<(), TaskFailure> {
        let Some(context) = self.context.as_ref() else {
            return Err(TaskFailure::fatal("no resource context bound"));
        };
        self.op.prepare(context)?;
        self.state = TaskState::Prepared;
        Ok(())
    }

    /// Run a prepared operation to completion.
    ///
    /// # Errors
    ///
    /// Returns the classified failure reported by the operation.
    pub async fn run(&mut self) -> Result<TaskOutput, TaskFailure> {
        if self.state != TaskState::Prepared {
            return Err(TaskFailure::fatal("run called before prepare"));
        }
        self.state = TaskState::Running;
        self.op.run().await
    }

    /// Count a failed attempt and decide whether to retry.
    pub fn record_failure(&mut self, failure: &TaskFailure) -> RetryDecision {
        self.failures += 1;
        if failure.is_retryable() && self.failures <= self.max_failures {
            self.state = TaskState::Created;
            RetryDecision::Retry
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Deliver the terminal result. Consumes the task.
    pub fn finish(mut self, result: TaskResult) {
        self.state = if result.is_ok() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        if let Some(done) = self.done.take() {
            // Receiver may have been dropped by an uninterested caller.
            let _ = done.send(result);
        }
    }

    /// One-line description for debug output.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "task {} ({}) of {} state={:?} failures={}/{}",
            self.id,
            self.op.describe(),
            self.session,
            self.state,
            self.failures,
            self.max_failures
        )
    }
}

impl fmt::Debug for TaskItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskItem")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("state", &self.state)
            .field("failures", &self.failures)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Receiving side of a task's terminal result.
#[derive(Debug)]
pub struct TaskCompletion {
    task_id: u64,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskCompletion {
    /// Task this completion belongs to.
    #[must_use]
    pub const fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Wait for the task to finish. A task dropped without a result (engine
    /// torn down) resolves to `TaskAbandoned`.
    ///
    /// # Errors
    ///
    /// Returns the task's terminal error.
    pub async fn wait(self) -> TaskResult {
        self.rx.await.unwrap_or(Err(SchedulerError::TaskAbandoned))
    }
}
