//! Tests for audit sink

use prometheus_session_scheduler::core::{
    AuditAction, AuditEvent, AuditSink, DeviceSpec, InMemoryAuditSink, SessionHandle,
};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);
    let session = SessionHandle::from("s1");

    sink.record(AuditEvent::task(&session, 1, AuditAction::Admit).on(DeviceSpec::gpu(0)));
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].session, session);
    assert_eq!(events[0].task_id, Some(1));
    assert_eq!(events[0].device, Some(DeviceSpec::gpu(0)));
    assert_eq!(events[0].action, AuditAction::Admit);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);
    let session = SessionHandle::from("s1");

    sink.record(AuditEvent::task(&session, 1, AuditAction::Admit));
    sink.record(AuditEvent::task(&session, 2, AuditAction::Admit));
    sink.record(AuditEvent::task(&session, 3, AuditAction::Admit));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, Some(2)); // First one popped
    assert_eq!(events[1].task_id, Some(3));
}

#[test]
fn test_clones_share_the_buffer() {
    let sink = InMemoryAuditSink::new(8);
    let clone = sink.clone();
    let session = SessionHandle::from("s1");

    clone.record(AuditEvent::session(&session, AuditAction::SessionOpen));
    clone.record(AuditEvent::task(&session, 4, AuditAction::Fail).with_detail("bad shape"));

    assert_eq!(sink.events().len(), 2);
    let failed = sink.events_of(AuditAction::Fail);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].detail.as_deref(), Some("bad shape"));
    assert!(failed[0].created_at_ms > 0);
}
