//! Scheduling policy properties, driven round by round without the engine loop.
//!
//! This test validates:
//! 1. Tasks within a session are admitted in arrival order
//! 2. Two equally demanding sessions share a contended device evenly
//! 3. A task larger than every compatible device fails without a grant
//! 4. One session's denial does not block another session

use std::sync::Arc;

use async_trait::async_trait;
use prometheus_session_scheduler::core::{
    DeviceSpec, DeviceType, FairScheduler, FifoScheduler, OperationTask, ResourceContext,
    ResourceLedger, Resources, ScheduleRound, Scheduler, SchedulerError, SessionChangeSet,
    SessionHandle, SessionItem, SessionOptions, SessionRef, TaskCompletion, TaskFailure, TaskItem,
    TaskOutput, MEMORY,
};

struct Demand(u64);

#[async_trait]
impl OperationTask for Demand {
    fn supported_device_types(&self) -> &[DeviceType] {
        &[DeviceType::Gpu]
    }

    fn estimated_usage(&self, _spec: DeviceSpec) -> Resources {
        Resources::zero().with(MEMORY, self.0)
    }

    fn prepare(&mut self, _context: &ResourceContext) -> Result<(), TaskFailure> {
        Ok(())
    }

    async fn run(&mut self) -> Result<TaskOutput, TaskFailure> {
        Ok(TaskOutput::Null)
    }
}

fn single_gpu(memory: u64) -> ResourceLedger {
    ResourceLedger::new([(DeviceSpec::gpu(0), Resources::zero().with(MEMORY, memory))])
}

fn session(name: &str, seq: u64) -> SessionRef {
    SessionItem::new(SessionHandle::from(name), seq, SessionOptions::default()).into_ref()
}

fn enqueue(session: &SessionRef, id: u64, memory: u64) -> TaskCompletion {
    let handle = session.lock().handle().clone();
    let (task, done) = TaskItem::new(id, handle, Box::new(Demand(memory)), 2);
    session.lock().enqueue(task);
    done
}

/// One round: rank, admit from each candidate until it stops making progress.
fn round(
    policy: &mut dyn Scheduler,
    ledger: &ResourceLedger,
    sessions: &[SessionRef],
    changes: &SessionChangeSet,
) -> Vec<TaskItem> {
    let candidates = policy.select_candidate_sessions(sessions, changes);
    let mut round = ScheduleRound::new(ledger, 64);
    for candidate in &candidates {
        loop {
            let (scheduled, has_more) = policy.maybe_schedule_from(candidate, &mut round);
            if scheduled == 0 || !has_more {
                break;
            }
        }
    }
    round.into_admitted()
}

/// Release every admitted task's grant and finish it.
fn complete(ledger: &ResourceLedger, sessions: &[SessionRef], admitted: Vec<TaskItem>) {
    for task in admitted {
        let context = task.context().unwrap();
        ledger.release(context).unwrap();
        let owner = sessions
            .iter()
            .find(|s| s.lock().handle() == task.session())
            .unwrap();
        owner.lock().record_release();
        task.finish(Ok(TaskOutput::Null));
    }
}

fn all_added(sessions: &[SessionRef]) -> SessionChangeSet {
    SessionChangeSet {
        added: sessions.iter().map(|s| s.lock().handle().clone()).collect(),
        removed: Vec::new(),
    }
}

#[test]
fn test_fifo_within_session() {
    let ledger = single_gpu(1_000);
    let s = session("s", 0);
    let sessions = vec![Arc::clone(&s)];
    for id in [1, 2, 3] {
        enqueue(&s, id, 10);
    }

    let mut policy = FairScheduler::default();
    let admitted = round(&mut policy, &ledger, &sessions, &all_added(&sessions));
    let order: Vec<u64> = admitted.iter().map(TaskItem::id).collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn test_fair_share_converges_under_contention() {
    // Every task needs the whole device, so only one runs at a time.
    let ledger = single_gpu(100);
    let a = session("a", 0);
    let b = session("b", 1);
    let sessions = vec![Arc::clone(&a), Arc::clone(&b)];
    for id in 0..40 {
        enqueue(&a, id, 100);
        enqueue(&b, 1_000 + id, 100);
    }

    let mut policy = FairScheduler::default();
    let mut changes = all_added(&sessions);
    let mut max_gap = 0_i64;
    for _ in 0..30 {
        let admitted = round(&mut policy, &ledger, &sessions, &changes);
        changes = SessionChangeSet::default();
        assert_eq!(admitted.len(), 1);
        complete(&ledger, &sessions, admitted);

        let gap = i64::try_from(a.lock().admitted_total()).unwrap()
            - i64::try_from(b.lock().admitted_total()).unwrap();
        max_gap = max_gap.max(gap.abs());
    }
    assert!(max_gap <= 1, "starvation gap {max_gap}");
    assert_eq!(a.lock().admitted_total(), 15);
    assert_eq!(b.lock().admitted_total(), 15);
}

#[test]
fn test_fifo_policy_serves_oldest_session_first() {
    let ledger = single_gpu(100);
    let a = session("a", 0);
    let b = session("b", 1);
    let sessions = vec![Arc::clone(&b), Arc::clone(&a)];
    for id in 0..3 {
        enqueue(&a, id, 100);
        enqueue(&b, 10 + id, 100);
    }

    let mut policy = FifoScheduler;
    for _ in 0..3 {
        let admitted = round(&mut policy, &ledger, &sessions, &SessionChangeSet::default());
        assert_eq!(admitted[0].session().as_str(), "a");
        complete(&ledger, &sessions, admitted);
    }
}

#[tokio::test]
async fn test_unschedulable_task_never_gets_a_grant() {
    let ledger = single_gpu(100);
    let s = session("s", 0);
    let sessions = vec![Arc::clone(&s)];
    let too_big = enqueue(&s, 1, 101);
    let fits = enqueue(&s, 2, 100);

    let mut policy = FairScheduler::default();
    let admitted = round(&mut policy, &ledger, &sessions, &all_added(&sessions));
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].id(), 2);
    assert!(matches!(
        too_big.wait().await,
        Err(SchedulerError::Unschedulable(1, _))
    ));

    complete(&ledger, &sessions, admitted);
    assert!(fits.wait().await.is_ok());
    assert_eq!(ledger.live_grants(), 0);
}

#[test]
fn test_denial_does_not_block_other_sessions() {
    let ledger = single_gpu(100);
    let big = session("big", 0);
    let small = session("small", 1);
    let sessions = vec![Arc::clone(&big), Arc::clone(&small)];
    enqueue(&big, 1, 90);
    enqueue(&big, 2, 90);
    enqueue(&small, 3, 10);

    let mut policy = FairScheduler::default();
    let admitted = round(&mut policy, &ledger, &sessions, &all_added(&sessions));
    let ids: Vec<u64> = admitted.iter().map(TaskItem::id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(big.lock().queue_len(), 1);
}
