//! Execution engine: owns the session table and drives scheduling rounds.
//!
//! Each round takes a snapshot of the live sessions and the change-set
//! accumulated since the previous round, asks the policy for candidates,
//! admits from each candidate against the ledger, and spawns every admitted
//! task. A finished task releases its grant, settles its result (complete,
//! retry, or fail), and wakes the loop because capacity may have freed up.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::core::audit::{AuditAction, AuditEvent, AuditSink};
use crate::core::error::SchedulerError;
use crate::core::executor::{OperationTask, TaskFailure, TaskOutput};
use crate::core::ledger::{DeviceUsage, ResourceLedger};
use crate::core::resources::Resources;
use crate::core::scheduler::{ScheduleRound, Scheduler};
use crate::core::session::{
    SessionChangeSet, SessionHandle, SessionItem, SessionOptions, SessionRef, SessionState,
};
use crate::core::task::{RetryDecision, TaskCompletion, TaskItem, DEFAULT_MAX_FAILURES};
use crate::runtime::TokioSpawner;

/// Tunables for the scheduling loop.
#[derive(Clone)]
pub struct EngineOptions {
    /// Retries granted to a retryable failure before it becomes fatal.
    pub max_failures: u32,
    /// Maximum admissions per round.
    pub round_budget: usize,
    /// How long the loop sleeps when nothing wakes it.
    pub idle_wait: Duration,
    /// Optional scheduling journal.
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl EngineOptions {
    /// Attach a scheduling journal.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            round_budget: 64,
            idle_wait: Duration::from_millis(50),
            audit: None,
        }
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Session handle.
    pub handle: SessionHandle,
    /// Lifecycle state.
    pub state: SessionState,
    /// Pending tasks.
    pub queued: usize,
    /// Tasks holding a grant.
    pub in_flight: usize,
    /// Tasks admitted over the session's lifetime.
    pub admitted_total: u64,
    /// Resources granted so far.
    pub usage: Resources,
    /// Policy-specific description.
    pub scheduler: String,
}

struct EngineShared {
    ledger: ResourceLedger,
    scheduler: Mutex<Box<dyn Scheduler>>,
    sessions: RwLock<HashMap<SessionHandle, SessionRef>>,
    changes: Mutex<SessionChangeSet>,
    wake: Notify,
    options: EngineOptions,
    spawner: TokioSpawner,
    next_task: AtomicU64,
    next_session: AtomicU64,
    shutdown: AtomicBool,
}

/// Scheduling engine. Clones share the same state.
#[derive(Clone)]
pub struct ExecutionEngine {
    shared: Arc<EngineShared>,
}

impl ExecutionEngine {
    /// Assemble an engine from its parts.
    #[must_use]
    pub fn new(
        ledger: ResourceLedger,
        scheduler: Box<dyn Scheduler>,
        options: EngineOptions,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                ledger,
                scheduler: Mutex::new(scheduler),
                sessions: RwLock::new(HashMap::new()),
                changes: Mutex::new(SessionChangeSet::default()),
                wake: Notify::new(),
                options,
                spawner,
                next_task: AtomicU64::new(1),
                next_session: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Resource ledger consulted for admission.
    #[must_use]
    pub fn ledger(&self) -> &ResourceLedger {
        &self.shared.ledger
    }

    /// Per-device capacity and availability.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceUsage> {
        self.shared.ledger.snapshot()
    }

    /// Name of the active policy.
    #[must_use]
    pub fn policy(&self) -> &'static str {
        self.shared.scheduler.lock().name()
    }

    /// Open a new session.
    pub fn create_session(&self, options: SessionOptions) -> SessionHandle {
        let handle = SessionHandle::generate();
        let seq = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        let session = SessionItem::new(handle.clone(), seq, options).into_ref();
        self.shared.sessions.write().insert(handle.clone(), session);
        self.shared.changes.lock().added.push(handle.clone());
        self.shared.record(AuditEvent::session(&handle, AuditAction::SessionOpen));
        info!(session = %handle, seq, abort_on_failure = options.abort_on_failure, "session created");
        handle
    }

    /// Stop accepting work on a session; it is removed once drained.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session is unknown or already closing.
    pub fn close_session(&self, handle: &SessionHandle) -> Result<(), SchedulerError> {
        let session = self
            .shared
            .lookup(handle)
            .ok_or_else(|| SchedulerError::SessionNotFound(handle.to_string()))?;
        if !session.lock().begin_close() {
            return Err(SchedulerError::SessionNotFound(handle.to_string()));
        }
        self.shared.record(AuditEvent::session(handle, AuditAction::SessionClosing));
        info!(session = %handle, "session closing");
        self.shared.try_finalize(&session);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Close every live session. Returns how many began closing.
    pub fn reset(&self) -> usize {
        let sessions = self.shared.snapshot();
        let mut closed = 0;
        for session in &sessions {
            let handle = {
                let mut guard = session.lock();
                if !guard.begin_close() {
                    continue;
                }
                guard.handle().clone()
            };
            self.shared.record(AuditEvent::session(&handle, AuditAction::SessionClosing));
            self.shared.try_finalize(session);
            closed += 1;
        }
        info!(closed, "all sessions closing");
        self.shared.wake.notify_one();
        closed
    }

    /// Close every session and let [`run`](Self::run) return once all have
    /// drained.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.reset();
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Queue an operation on a running session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session is unknown or no longer
    /// accepting work.
    pub fn submit(
        &self,
        handle: &SessionHandle,
        op: Box<dyn OperationTask>,
    ) -> Result<TaskCompletion, SchedulerError> {
        let session = self
            .shared
            .lookup(handle)
            .ok_or_else(|| SchedulerError::SessionNotFound(handle.to_string()))?;
        let id = self.shared.next_task.fetch_add(1, Ordering::Relaxed);
        let (task, done) = TaskItem::new(id, handle.clone(), op, self.shared.options.max_failures);
        {
            let mut guard = session.lock();
            if !guard.accepts_work() {
                return Err(SchedulerError::SessionNotFound(handle.to_string()));
            }
            debug!(session = %handle, task_id = id, op = %task.describe(), "task queued");
            guard.enqueue(task);
        }
        self.shared.wake.notify_one();
        Ok(done)
    }

    /// Lifecycle state of a session still in the live set.
    #[must_use]
    pub fn session_state(&self, handle: &SessionHandle) -> Option<SessionState> {
        self.shared.lookup(handle).map(|s| s.lock().state())
    }

    /// Handles of every session in the live set.
    #[must_use]
    pub fn live_sessions(&self) -> Vec<SessionHandle> {
        self.shared.sessions.read().keys().cloned().collect()
    }

    /// Policy debug string for a session.
    #[must_use]
    pub fn debug_session(&self, handle: &SessionHandle) -> Option<String> {
        let session = self.shared.lookup(handle)?;
        Some(self.shared.scheduler.lock().debug_string(&session))
    }

    /// Summary of a session's queue and usage.
    #[must_use]
    pub fn session_summary(&self, handle: &SessionHandle) -> Option<SessionSummary> {
        let session = self.shared.lookup(handle)?;
        let scheduler = self.shared.scheduler.lock().debug_string(&session);
        let guard = session.lock();
        Some(SessionSummary {
            handle: guard.handle().clone(),
            state: guard.state(),
            queued: guard.queue_len(),
            in_flight: guard.in_flight(),
            admitted_total: guard.admitted_total(),
            usage: guard.usage().clone(),
            scheduler,
        })
    }

    /// Run one scheduling round and spawn whatever was admitted.
    /// Returns the number of tasks admitted.
    pub fn schedule_round(&self) -> usize {
        let shared = &self.shared;
        let sessions = shared.snapshot();
        let changes = shared.changes.lock().take();

        let admitted = {
            let mut scheduler = shared.scheduler.lock();
            let candidates = scheduler.select_candidate_sessions(&sessions, &changes);
            let mut round = ScheduleRound::new(&shared.ledger, shared.options.round_budget)
                .with_audit(shared.options.audit.as_deref());
            for session in &candidates {
                if round.remaining_budget() == 0 {
                    break;
                }
                loop {
                    let (scheduled, has_more) = scheduler.maybe_schedule_from(session, &mut round);
                    if scheduled == 0 || !has_more || round.remaining_budget() == 0 {
                        break;
                    }
                }
            }
            round.into_admitted()
        };

        // Unschedulable tasks may have emptied a closing session.
        for session in &sessions {
            shared.try_finalize(session);
        }

        let count = admitted.len();
        if count > 0 {
            debug!(admitted = count, sessions = sessions.len(), "scheduling round");
        }
        for task in admitted {
            Arc::clone(shared).dispatch(task);
        }
        count
    }

    /// Drive scheduling until [`shutdown`](Self::shutdown) is requested and
    /// every session has drained.
    pub async fn run(&self) {
        info!(
            policy = self.policy(),
            devices = self.shared.ledger.devices().len(),
            "execution engine started"
        );
        loop {
            let admitted = self.schedule_round();
            if self.is_shutting_down() && self.shared.sessions.read().is_empty() {
                break;
            }
            if admitted > 0 {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                () = self.shared.wake.notified() => {}
                () = tokio::time::sleep(self.shared.options.idle_wait) => {}
            }
        }
        info!("execution engine stopped");
    }
}

impl EngineShared {
    fn lookup(&self, handle: &SessionHandle) -> Option<SessionRef> {
        self.sessions.read().get(handle).cloned()
    }

    fn snapshot(&self) -> Vec<SessionRef> {
        self.sessions.read().values().cloned().collect()
    }

    fn record(&self, event: AuditEvent) {
        if let Some(audit) = self.options.audit.as_ref() {
            audit.record(event);
        }
    }

    /// Remove a closing session from the live set once it has drained.
    fn try_finalize(&self, session: &SessionRef) {
        let handle = {
            let mut guard = session.lock();
            if !guard.try_finish_close() {
                return;
            }
            guard.handle().clone()
        };
        self.sessions.write().remove(&handle);
        self.changes.lock().removed.push(handle.clone());
        self.record(AuditEvent::session(&handle, AuditAction::SessionClosed));
        info!(session = %handle, "session closed");
    }

    fn dispatch(self: Arc<Self>, task: TaskItem) {
        let spawner = self.spawner.clone();
        spawner.spawn(async move {
            let mut guard = SettleGuard {
                shared: self,
                task: Some(task),
            };
            let Some(task) = guard.task.as_mut() else {
                return;
            };
            let task_id = task.id();
            let attempt = AssertUnwindSafe(async {
                task.prepare()?;
                task.run().await
            })
            .catch_unwind()
            .await;
            let outcome = attempt.unwrap_or_else(|payload| {
                let reason = panic_message(payload.as_ref());
                error!(task_id, reason = %reason, "operation panicked");
                Err(TaskFailure::fatal(format!("operation panicked: {reason}")))
            });
            guard.settle(outcome);
        });
    }

    fn settle(&self, mut task: TaskItem, outcome: Result<TaskOutput, TaskFailure>) {
        let handle = task.session().clone();
        let task_id = task.id();
        let device = task.context().map(|c| c.spec());
        if let Some(context) = task.take_context() {
            if let Err(e) = self.ledger.release(&context) {
                error!(session = %handle, task_id, error = %e, "grant release failed");
            }
        }

        let Some(session) = self.lookup(&handle) else {
            warn!(session = %handle, task_id, "task finished after its session was removed");
            task.finish(Err(SchedulerError::SessionNotFound(handle.to_string())));
            self.wake.notify_one();
            return;
        };

        {
            let mut guard = session.lock();
            guard.record_release();
            match outcome {
                Ok(output) => {
                    debug!(session = %handle, task_id, "task completed");
                    self.record(with_device(
                        AuditEvent::task(&handle, task_id, AuditAction::Complete),
                        device,
                    ));
                    task.finish(Ok(output));
                }
                Err(failure) => match task.record_failure(&failure) {
                    RetryDecision::Retry => {
                        warn!(
                            session = %handle,
                            task_id,
                            attempt = task.failures(),
                            reason = %failure,
                            "retryable failure, requeueing"
                        );
                        self.record(
                            AuditEvent::task(&handle, task_id, AuditAction::Retry)
                                .with_detail(failure.message),
                        );
                        guard.requeue_front(task);
                    }
                    RetryDecision::GiveUp => {
                        let message = if failure.is_retryable() {
                            format!("{} (gave up after {} attempts)", failure.message, task.failures())
                        } else {
                            failure.message.clone()
                        };
                        error!(session = %handle, task_id, reason = %message, "task failed");
                        self.record(
                            AuditEvent::task(&handle, task_id, AuditAction::Fail)
                                .with_detail(message.clone()),
                        );
                        task.finish(Err(SchedulerError::FatalExecution(message)));
                        if guard.options().abort_on_failure {
                            let dropped = guard.abort();
                            warn!(session = %handle, dropped, "session aborted after fatal failure");
                        }
                    }
                },
            }
        }

        self.try_finalize(&session);
        self.wake.notify_one();
    }
}

/// Settles its task exactly once. Dropped without settling (the spawned
/// future was cancelled), it fails the task so the grant still returns.
struct SettleGuard {
    shared: Arc<EngineShared>,
    task: Option<TaskItem>,
}

impl SettleGuard {
    fn settle(mut self, outcome: Result<TaskOutput, TaskFailure>) {
        if let Some(task) = self.task.take() {
            self.shared.settle(task, outcome);
        }
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            warn!(task_id = task.id(), "task dropped before settling");
            self.shared
                .settle(task, Err(TaskFailure::fatal("operation abandoned before completion")));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn with_device(event: AuditEvent, device: Option<crate::core::device::DeviceSpec>) -> AuditEvent {
    match device {
        Some(spec) => event.on(spec),
        None => event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::InMemoryAuditSink;
    use crate::core::device::{DeviceSpec, DeviceType};
    use crate::core::ledger::ResourceContext;
    use crate::core::resources::MEMORY;
    use crate::core::scheduler::FairScheduler;
    use async_trait::async_trait;

    struct Echo(u64);

    #[async_trait]
    impl OperationTask for Echo {
        fn supported_device_types(&self) -> &[DeviceType] {
            &[DeviceType::Cpu]
        }

        fn estimated_usage(&self, _spec: DeviceSpec) -> Resources {
            Resources::zero().with(MEMORY, 1)
        }

        fn prepare(&mut self, _context: &ResourceContext) -> Result<(), TaskFailure> {
            Ok(())
        }

        async fn run(&mut self) -> Result<TaskOutput, TaskFailure> {
            Ok(serde_json::json!(self.0))
        }
    }

    fn engine(audit: &InMemoryAuditSink) -> ExecutionEngine {
        let ledger = ResourceLedger::new([(DeviceSpec::cpu(0), Resources::zero().with(MEMORY, 4))]);
        let options = EngineOptions::default().with_audit(Arc::new(audit.clone()));
        ExecutionEngine::new(
            ledger,
            Box::new(FairScheduler::default()),
            options,
            TokioSpawner::current(),
        )
    }

    #[tokio::test]
    async fn submitted_task_completes_and_releases() {
        let audit = InMemoryAuditSink::new(64);
        let engine = engine(&audit);
        let session = engine.create_session(SessionOptions::default());
        let done = engine.submit(&session, Box::new(Echo(7))).unwrap();
        assert_eq!(engine.schedule_round(), 1);
        assert_eq!(done.wait().await.unwrap(), serde_json::json!(7));
        assert_eq!(engine.ledger().live_grants(), 0);
        assert_eq!(audit.events_of(AuditAction::Complete).len(), 1);
    }

    #[tokio::test]
    async fn closing_idle_session_is_removed_immediately() {
        let audit = InMemoryAuditSink::new(64);
        let engine = engine(&audit);
        let session = engine.create_session(SessionOptions::default());
        engine.close_session(&session).unwrap();
        assert_eq!(engine.session_state(&session), None);
        assert!(matches!(
            engine.close_session(&session),
            Err(SchedulerError::SessionNotFound(_))
        ));
        assert_eq!(audit.events_of(AuditAction::SessionClosed).len(), 1);
    }

    #[tokio::test]
    async fn unknown_session_rejects_submit() {
        let audit = InMemoryAuditSink::new(8);
        let engine = engine(&audit);
        let err = engine.submit(&"nope".into(), Box::new(Echo(1))).unwrap_err();
        assert_eq!(err.code(), "session_not_found");
    }

    #[tokio::test]
    async fn summary_reports_queue() {
        let audit = InMemoryAuditSink::new(8);
        let engine = engine(&audit);
        let session = engine.create_session(SessionOptions::default());
        let _pending = engine.submit(&session, Box::new(Echo(1))).unwrap();
        let summary = engine.session_summary(&session).unwrap();
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.state, SessionState::Running);
        assert!(summary.scheduler.contains("[fair]"));
        assert_eq!(engine.policy(), "fair");
    }

    #[tokio::test]
    async fn run_exits_after_shutdown_drains() {
        let audit = InMemoryAuditSink::new(64);
        let engine = engine(&audit);
        let session = engine.create_session(SessionOptions::default());
        let done = engine.submit(&session, Box::new(Echo(3))).unwrap();
        let runner = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run().await }
        });
        engine.shutdown();
        assert_eq!(done.wait().await.unwrap(), serde_json::json!(3));
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(engine.live_sessions().is_empty());
    }
}
