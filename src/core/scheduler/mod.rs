//! Scheduling policies.
//!
//! A policy does two things per round: rank the live sessions into an ordered
//! candidate list, and admit tasks from one candidate against the ledger.
//! Admission itself is shared by every policy: tasks leave the head of the
//! session's queue in FIFO order, each is placed on the first compatible
//! device (preference order, then ordinal) with room for it, and the first
//! denial ends the session's turn without skipping ahead.

mod fair;
mod fifo;

pub use fair::FairScheduler;
pub use fifo::FifoScheduler;

use tracing::{debug, warn};

use crate::core::audit::{AuditAction, AuditEvent, AuditSink};
use crate::core::error::SchedulerError;
use crate::core::ledger::{ResourceContext, ResourceLedger};
use crate::core::resources::Resources;
use crate::core::session::{SessionChangeSet, SessionItem, SessionRef, SessionState};
use crate::core::task::TaskItem;

/// A scheduling policy.
pub trait Scheduler: Send {
    /// Policy name for logs.
    fn name(&self) -> &'static str;

    /// Apply `changes` to the policy's bookkeeping and return the sessions
    /// eligible this round, best candidate first.
    fn select_candidate_sessions(
        &mut self,
        sessions: &[SessionRef],
        changes: &SessionChangeSet,
    ) -> Vec<SessionRef>;

    /// Admit tasks from the head of `session`'s queue. Returns the number
    /// admitted and whether the session still has queued work.
    fn maybe_schedule_from(
        &mut self,
        session: &SessionRef,
        round: &mut ScheduleRound<'_>,
    ) -> (usize, bool);

    /// Human-readable summary of a session's scheduling state.
    fn debug_string(&self, session: &SessionRef) -> String;
}

/// Working state of one scheduling round.
pub struct ScheduleRound<'a> {
    ledger: &'a ResourceLedger,
    totals: Resources,
    budget: usize,
    admitted: Vec<TaskItem>,
    audit: Option<&'a dyn AuditSink>,
}

impl<'a> ScheduleRound<'a> {
    /// Start a round that may admit at most `budget` tasks.
    #[must_use]
    pub fn new(ledger: &'a ResourceLedger, budget: usize) -> Self {
        Self {
            ledger,
            totals: ledger.total_capacity(),
            budget,
            admitted: Vec::new(),
            audit: None,
        }
    }

    /// Record decisions to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Option<&'a dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Admissions still allowed this round.
    #[must_use]
    pub const fn remaining_budget(&self) -> usize {
        self.budget
    }

    /// Summed capacity of the pool, used to normalize usage.
    #[must_use]
    pub const fn totals(&self) -> &Resources {
        &self.totals
    }

    /// Tasks admitted so far.
    #[must_use]
    pub fn admitted(&self) -> &[TaskItem] {
        &self.admitted
    }

    /// Finish the round, yielding admitted tasks in admission order.
    #[must_use]
    pub fn into_admitted(self) -> Vec<TaskItem> {
        self.admitted
    }

    fn record(&self, event: AuditEvent) {
        if let Some(audit) = self.audit {
            audit.record(event);
        }
    }
}

/// Whether a session takes part in a round.
pub(crate) fn is_candidate(session: &SessionItem) -> bool {
    match session.state() {
        SessionState::Running => true,
        SessionState::Closing => session.queue_len() > 0,
        SessionState::Closed => false,
    }
}

enum Placement {
    Granted(ResourceContext),
    Denied,
    Unschedulable(String),
}

fn place(task: &mut TaskItem, ledger: &ResourceLedger) -> Placement {
    let types = task.supported_device_types();
    if types.is_empty() {
        return Placement::Unschedulable("no supported device types".into());
    }
    let mut feasible = false;
    for device_type in types {
        for spec in ledger.devices_of_type(device_type) {
            let need = task.estimated_usage(spec);
            if !ledger.is_feasible(spec, &need) {
                continue;
            }
            feasible = true;
            match ledger.try_reserve(spec, task.id(), &need) {
                Ok(context) => return Placement::Granted(context),
                Err(SchedulerError::AdmissionDenied(_)) => {}
                Err(e) => warn!(task_id = task.id(), device = %spec, error = %e, "reserve failed"),
            }
        }
    }
    if feasible {
        Placement::Denied
    } else {
        Placement::Unschedulable("demand exceeds every compatible device's capacity".into())
    }
}

/// Admit from the head of `session` until the queue empties, a task is
/// denied, or the round budget runs out. `on_grant` observes every grant.
pub(crate) fn admit_from(
    session: &mut SessionItem,
    round: &mut ScheduleRound<'_>,
    mut on_grant: impl FnMut(&Resources),
) -> (usize, bool) {
    let mut scheduled = 0;
    while round.budget > 0 {
        let Some(mut task) = session.pop_front() else {
            return (scheduled, false);
        };
        match place(&mut task, round.ledger) {
            Placement::Granted(context) => {
                let granted = context.resources().clone();
                round.record(
                    AuditEvent::task(session.handle(), task.id(), AuditAction::Admit).on(context.spec()),
                );
                debug!(
                    session = %session.handle(),
                    task_id = task.id(),
                    device = %context.spec(),
                    granted = %granted,
                    "task admitted"
                );
                task.bind(context);
                session.record_admission(&granted);
                on_grant(&granted);
                round.admitted.push(task);
                round.budget -= 1;
                scheduled += 1;
            }
            Placement::Denied => {
                debug!(session = %session.handle(), task_id = task.id(), "admission denied, yielding");
                session.requeue_front(task);
                return (scheduled, true);
            }
            Placement::Unschedulable(reason) => {
                warn!(session = %session.handle(), task_id = task.id(), %reason, "task unschedulable");
                round.record(
                    AuditEvent::task(session.handle(), task.id(), AuditAction::Unschedulable)
                        .with_detail(reason.clone()),
                );
                let id = task.id();
                task.finish(Err(SchedulerError::Unschedulable(id, reason)));
                if session.options().abort_on_failure {
                    session.abort();
                    return (scheduled, false);
                }
            }
        }
    }
    (scheduled, session.queue_len() > 0)
}
