//! Tests for configuration validation

use std::collections::BTreeMap;

use prometheus_session_scheduler::config::{
    DeviceConfig, EngineConfig, PipelineConfig, SchedulerPolicy, ServerConfig,
};
use prometheus_session_scheduler::core::DeviceType;

fn device(device_type: DeviceType, id: u32, memory: u64) -> DeviceConfig {
    let mut capacity = BTreeMap::new();
    capacity.insert("memory".to_string(), memory);
    DeviceConfig {
        device_type,
        id,
        capacity,
    }
}

#[test]
fn test_engine_config_validation() {
    let valid = EngineConfig::with_devices(vec![
        device(DeviceType::Gpu, 0, 16_000),
        device(DeviceType::Cpu, 0, 64_000),
    ]);
    assert!(valid.validate().is_ok());
    assert_eq!(valid.policy, SchedulerPolicy::Fair);
    assert_eq!(valid.max_failures, 2);
}

#[test]
fn test_engine_config_no_devices() {
    let invalid = EngineConfig::with_devices(Vec::new());
    assert!(invalid.validate().is_err());
}

#[test]
fn test_engine_config_duplicate_device() {
    let invalid = EngineConfig::with_devices(vec![
        device(DeviceType::Gpu, 0, 100),
        device(DeviceType::Gpu, 0, 200),
    ]);
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("GPU:0"), "{err}");
}

#[test]
fn test_engine_config_zero_capacity() {
    let invalid = EngineConfig::with_devices(vec![device(DeviceType::Gpu, 0, 0)]);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_engine_config_invalid_tunables() {
    let mut cfg = EngineConfig::with_devices(vec![device(DeviceType::Gpu, 0, 100)]);
    cfg.round_budget = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = EngineConfig::with_devices(vec![device(DeviceType::Gpu, 0, 100)]);
    cfg.usage_decay = 0.0;
    assert!(cfg.validate().is_err());
    cfg.usage_decay = 1.5;
    assert!(cfg.validate().is_err());
    cfg.usage_decay = 0.5;
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_pipeline_config_validation() {
    assert!(PipelineConfig::default().validate().is_ok());

    let invalid = PipelineConfig {
        send_queue_depth: 0,
        ..PipelineConfig::default()
    };
    assert!(invalid.validate().is_err());

    let invalid = PipelineConfig {
        bind_address: "  ".into(),
        ..PipelineConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_server_config_from_json() {
    let json = r#"{
        "engine": {
            "devices": [
                { "type": "gpu", "id": 0, "capacity": { "memory": 24000, "compute_slots": 4 } },
                { "type": "cpu", "id": 0, "capacity": { "memory": 64000 } }
            ],
            "policy": "fifo"
        }
    }"#;

    let config = ServerConfig::from_json_str(json).unwrap();
    assert_eq!(config.engine.devices.len(), 2);
    assert_eq!(config.engine.policy, SchedulerPolicy::Fifo);
    assert_eq!(config.engine.round_budget, 64);
    assert_eq!(config.pipeline, PipelineConfig::default());
}

#[test]
fn test_server_config_rejects_invalid_section() {
    let json = r#"{
        "engine": { "devices": [] },
        "pipeline": { "bind_address": "tcp://0.0.0.0:6000" }
    }"#;
    let err = ServerConfig::from_json_str(json).unwrap_err();
    assert!(err.starts_with("engine invalid"), "{err}");

    let err = ServerConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"), "{err}");
}
