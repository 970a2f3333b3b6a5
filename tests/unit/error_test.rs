//! Tests for error types

use prometheus_session_scheduler::core::{DeviceSpec, SchedulerError};
use prometheus_session_scheduler::runtime::api::ErrorReply;

#[test]
fn test_session_not_found_error() {
    let err = SchedulerError::SessionNotFound("s-1".to_string());
    assert_eq!(format!("{err}"), "session `s-1` not found");
    assert_eq!(err.code(), "session_not_found");
}

#[test]
fn test_admission_denied_is_retryable() {
    let err = SchedulerError::AdmissionDenied(DeviceSpec::gpu(0));
    assert!(err.is_retryable());
    assert!(!SchedulerError::FatalExecution("boom".into()).is_retryable());
}

#[test]
fn test_unschedulable_error() {
    let err = SchedulerError::Unschedulable(7, "needs 200 memory".to_string());
    assert_eq!(format!("{err}"), "task 7 is unschedulable: needs 200 memory");
}

#[test]
fn test_error_reply_from_error() {
    let err = SchedulerError::UnknownRequestType("model.train".to_string());
    let reply = ErrorReply::from(&err);
    assert_eq!(reply.code, "unknown_request_type");
    assert_eq!(reply.message, "unknown request type `model.train`");
}
