//! Creation-order policy.

use crate::core::session::{SessionChangeSet, SessionRef};

use super::{admit_from, is_candidate, ScheduleRound, Scheduler};

/// Sessions are served in creation order; usage history is ignored.
#[derive(Debug, Default)]
pub struct FifoScheduler;

impl Scheduler for FifoScheduler {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select_candidate_sessions(
        &mut self,
        sessions: &[SessionRef],
        _changes: &SessionChangeSet,
    ) -> Vec<SessionRef> {
        let mut ranked: Vec<(u64, SessionRef)> = sessions
            .iter()
            .filter_map(|session| {
                let guard = session.lock();
                is_candidate(&guard).then(|| (guard.seq(), session.clone()))
            })
            .collect();
        ranked.sort_by_key(|(seq, _)| *seq);
        ranked.into_iter().map(|(_, session)| session).collect()
    }

    fn maybe_schedule_from(
        &mut self,
        session: &SessionRef,
        round: &mut ScheduleRound<'_>,
    ) -> (usize, bool) {
        admit_from(&mut session.lock(), round, |_| {})
    }

    fn debug_string(&self, session: &SessionRef) -> String {
        let guard = session.lock();
        format!(
            "{} [fifo] seq={} state={:?} queued={} in_flight={}",
            guard.handle(),
            guard.seq(),
            guard.state(),
            guard.queue_len(),
            guard.in_flight(),
        )
    }
}
