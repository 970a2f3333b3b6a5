//! Fair-share policy: least aggregate usage goes first.

use std::collections::HashMap;

use crate::core::session::{SessionChangeSet, SessionHandle, SessionRef};

use super::{admit_from, is_candidate, ScheduleRound, Scheduler};

/// Fair-share policy.
///
/// Sessions are ranked ascending by their aggregate normalized usage, so the
/// tenant that has consumed least so far goes first. Each grant adds the
/// granted amount, normalized per dimension against pool capacity, to the
/// owner's figure. Every `select_candidate_sessions` call first multiplies
/// all figures by `decay`; `1.0` keeps the full history.
#[derive(Debug)]
pub struct FairScheduler {
    agg_usage: HashMap<SessionHandle, f64>,
    decay: f64,
}

impl FairScheduler {
    /// Create a policy with the given per-round usage decay in `(0, 1]`.
    #[must_use]
    pub fn new(decay: f64) -> Self {
        Self {
            agg_usage: HashMap::new(),
            decay: decay.clamp(f64::MIN_POSITIVE, 1.0),
        }
    }

    /// Aggregate usage recorded for `handle`.
    #[must_use]
    pub fn usage_of(&self, handle: &SessionHandle) -> f64 {
        self.agg_usage.get(handle).copied().unwrap_or(0.0)
    }

    /// Sessions currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.agg_usage.len()
    }

    fn apply_changes(&mut self, changes: &SessionChangeSet) {
        for handle in &changes.added {
            self.agg_usage.entry(handle.clone()).or_insert(0.0);
        }
        for handle in &changes.removed {
            self.agg_usage.remove(handle);
        }
        if self.decay < 1.0 {
            for usage in self.agg_usage.values_mut() {
                *usage *= self.decay;
            }
        }
    }
}

impl Default for FairScheduler {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Scheduler for FairScheduler {
    fn name(&self) -> &'static str {
        "fair"
    }

    fn select_candidate_sessions(
        &mut self,
        sessions: &[SessionRef],
        changes: &SessionChangeSet,
    ) -> Vec<SessionRef> {
        self.apply_changes(changes);

        let mut ranked: Vec<(f64, u64, SessionRef)> = sessions
            .iter()
            .filter_map(|session| {
                let guard = session.lock();
                is_candidate(&guard).then(|| (self.usage_of(guard.handle()), guard.seq(), session.clone()))
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, _, session)| session).collect()
    }

    fn maybe_schedule_from(
        &mut self,
        session: &SessionRef,
        round: &mut ScheduleRound<'_>,
    ) -> (usize, bool) {
        let totals = round.totals().clone();
        let mut guard = session.lock();
        let usage = self.agg_usage.entry(guard.handle().clone()).or_insert(0.0);
        admit_from(&mut guard, round, |granted| {
            *usage += granted.normalized_share(&totals);
        })
    }

    fn debug_string(&self, session: &SessionRef) -> String {
        let guard = session.lock();
        format!(
            "{} [fair] state={:?} queued={} in_flight={} admitted={} agg_usage={:.4} usage={}",
            guard.handle(),
            guard.state(),
            guard.queue_len(),
            guard.in_flight(),
            guard.admitted_total(),
            self.usage_of(guard.handle()),
            guard.usage(),
        )
    }
}
