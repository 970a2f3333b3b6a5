//! Tests for builder modules

use std::collections::BTreeMap;

use prometheus_session_scheduler::builders::{build_engine, build_ledger, build_scheduler};
use prometheus_session_scheduler::config::{DeviceConfig, EngineConfig, SchedulerPolicy};
use prometheus_session_scheduler::core::{DeviceSpec, DeviceType, SchedulerError, MEMORY};
use prometheus_session_scheduler::runtime::TokioSpawner;

fn gpu_config(memory: u64) -> EngineConfig {
    let mut capacity = BTreeMap::new();
    capacity.insert(MEMORY.to_string(), memory);
    EngineConfig::with_devices(vec![DeviceConfig {
        device_type: DeviceType::Gpu,
        id: 0,
        capacity,
    }])
}

#[test]
fn test_scheduler_follows_policy() {
    let mut cfg = gpu_config(100);
    assert_eq!(build_scheduler(&cfg).name(), "fair");
    cfg.policy = SchedulerPolicy::Fifo;
    assert_eq!(build_scheduler(&cfg).name(), "fifo");
}

#[test]
fn test_ledger_matches_inventory() {
    let ledger = build_ledger(&gpu_config(100));
    let capacity = ledger.capacity_of(DeviceSpec::gpu(0)).unwrap();
    assert_eq!(capacity.get(MEMORY), 100);
    assert!(ledger.capacity_of(DeviceSpec::cpu(0)).is_none());
}

#[tokio::test]
async fn test_build_engine() {
    let engine = build_engine(&gpu_config(100), TokioSpawner::current()).unwrap();
    assert_eq!(engine.policy(), "fair");
    assert_eq!(engine.devices().len(), 1);
}

#[tokio::test]
async fn test_build_engine_rejects_invalid_config() {
    let result = build_engine(&gpu_config(0), TokioSpawner::current());
    assert!(matches!(result, Err(SchedulerError::Config(_))));
}
