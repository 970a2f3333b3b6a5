//! Tenant sessions and their pending work.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::resources::Resources;
use crate::core::task::TaskItem;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a fresh random handle.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow the handle as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting and running work.
    Running,
    /// No new work accepted; draining queued and in-flight tasks.
    Closing,
    /// Drained and removed from the live set.
    Closed,
}

/// Per-session behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Close the session and fail its queue on the first fatal task failure.
    #[serde(default)]
    pub abort_on_failure: bool,
}

/// A tenant's live context.
#[derive(Debug)]
pub struct SessionItem {
    handle: SessionHandle,
    /// Creation order across the engine; used for deterministic tie-breaks.
    seq: u64,
    state: SessionState,
    options: SessionOptions,
    queue: VecDeque<TaskItem>,
    usage: Resources,
    in_flight: usize,
    admitted_total: u64,
}

/// Shared reference to a session as held by the engine's session table.
pub type SessionRef = Arc<Mutex<SessionItem>>;

impl SessionItem {
    /// Create a running session.
    #[must_use]
    pub fn new(handle: SessionHandle, seq: u64, options: SessionOptions) -> Self {
        Self {
            handle,
            seq,
            state: SessionState::Running,
            options,
            queue: VecDeque::new(),
            usage: Resources::zero(),
            in_flight: 0,
            admitted_total: 0,
        }
    }

    /// Wrap into a shared reference.
    #[must_use]
    pub fn into_ref(self) -> SessionRef {
        Arc::new(Mutex::new(self))
    }

    /// Session handle.
    #[must_use]
    pub const fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Creation sequence number.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Behavior switches.
    #[must_use]
    pub const fn options(&self) -> SessionOptions {
        self.options
    }

    /// Aggregate resources granted to this session so far.
    #[must_use]
    pub const fn usage(&self) -> &Resources {
        &self.usage
    }

    /// Tasks currently holding a grant.
    #[must_use]
    pub const fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Tasks admitted over the session's lifetime, retries included.
    #[must_use]
    pub const fn admitted_total(&self) -> u64 {
        self.admitted_total
    }

    /// Pending tasks.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// True when no work is queued or in flight.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0
    }

    /// Whether the session still accepts new tasks.
    #[must_use]
    pub fn accepts_work(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Append a task in arrival order.
    pub fn enqueue(&mut self, task: TaskItem) {
        self.queue.push_back(task);
    }

    /// Put a task back at the head of the queue (denied admission or retry).
    pub fn requeue_front(&mut self, task: TaskItem) {
        self.queue.push_front(task);
    }

    /// Take the oldest pending task.
    pub fn pop_front(&mut self) -> Option<TaskItem> {
        self.queue.pop_front()
    }

    /// Remove every pending task.
    pub fn drain_queue(&mut self) -> Vec<TaskItem> {
        self.queue.drain(..).collect()
    }

    /// Account a granted task.
    pub fn record_admission(&mut self, granted: &Resources) {
        self.usage.add_assign_saturating(granted);
        self.in_flight += 1;
        self.admitted_total += 1;
    }

    /// Account a task whose grant was returned.
    pub fn record_release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Stop accepting work. Returns `false` if already closing or closed.
    pub fn begin_close(&mut self) -> bool {
        if self.state == SessionState::Running {
            self.state = SessionState::Closing;
            true
        } else {
            false
        }
    }

    /// Transition `Closing → Closed` once drained. Returns whether it closed.
    pub fn try_finish_close(&mut self) -> bool {
        if self.state == SessionState::Closing && self.is_drained() {
            self.state = SessionState::Closed;
            true
        } else {
            false
        }
    }

    /// Begin closing and fail every queued task with `SessionAborted`.
    /// In-flight tasks are left to drain. Returns how many tasks were failed.
    pub fn abort(&mut self) -> usize {
        self.begin_close();
        let pending = self.drain_queue();
        let failed = pending.len();
        for task in pending {
            task.finish(Err(SchedulerError::SessionAborted(self.handle.to_string())));
        }
        failed
    }

    /// Descriptions of the pending tasks, head first.
    #[must_use]
    pub fn describe_queue(&self) -> Vec<String> {
        self.queue.iter().map(TaskItem::describe).collect()
    }
}

/// Sessions added and removed since the previous scheduling round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionChangeSet {
    /// Newly created sessions.
    pub added: Vec<SessionHandle>,
    /// Sessions that reached `Closed`.
    pub removed: Vec<SessionHandle>,
}

impl SessionChangeSet {
    /// True if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Take the accumulated changes, leaving an empty set.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
