//! Scheduling journal.
//!
//! Records admission, completion, retry and failure decisions for operational
//! visibility. The in-memory sink keeps a bounded window of recent events.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::device::DeviceSpec;
use crate::core::session::SessionHandle;
use crate::util::clock::now_ms;

/// Kind of scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Session created.
    SessionOpen,
    /// Session began closing.
    SessionClosing,
    /// Session drained and removed.
    SessionClosed,
    /// Task admitted on a device.
    Admit,
    /// Task completed successfully.
    Complete,
    /// Task failed with a retryable error and was requeued.
    Retry,
    /// Task failed permanently.
    Fail,
    /// Task could never fit any compatible device.
    Unschedulable,
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Session the event concerns.
    pub session: SessionHandle,
    /// Task identifier for task-level events.
    pub task_id: Option<u64>,
    /// Device for placement events.
    pub device: Option<DeviceSpec>,
    /// Decision taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Session-level event.
    #[must_use]
    pub fn session(session: &SessionHandle, action: AuditAction) -> Self {
        Self {
            session: session.clone(),
            task_id: None,
            device: None,
            action,
            created_at_ms: now_ms(),
            detail: None,
        }
    }

    /// Task-level event.
    #[must_use]
    pub fn task(session: &SessionHandle, task_id: u64, action: AuditAction) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::session(session, action)
        }
    }

    /// Attach the device.
    #[must_use]
    pub const fn on(mut self, device: DeviceSpec) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach free-form context.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// In-memory audit sink with a bounded buffer. Clones share the buffer.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Snapshot filtered to one action.
    #[must_use]
    pub fn events_of(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}
