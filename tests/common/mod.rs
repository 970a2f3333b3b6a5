//! Shared operations and fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_session_scheduler::builders::build_engine_with_audit;
use prometheus_session_scheduler::config::{DeviceConfig, EngineConfig, SchedulerPolicy};
use prometheus_session_scheduler::core::{
    DeviceSpec, DeviceType, ExecutionEngine, InMemoryAuditSink, OperationTask, ResourceContext,
    Resources, SchedulerError, TaskFailure, TaskOutput, MEMORY,
};
use prometheus_session_scheduler::runtime::{TaskFactory, TokioSpawner};
use prometheus_session_scheduler::util::init_tracing_with;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

/// Operation that sleeps, then returns `output`.
pub struct SleepOp {
    pub types: Vec<DeviceType>,
    pub memory: u64,
    pub delay: Duration,
    pub output: Value,
}

impl SleepOp {
    pub fn gpu(memory: u64, delay_ms: u64, output: Value) -> Self {
        Self {
            types: vec![DeviceType::Gpu],
            memory,
            delay: Duration::from_millis(delay_ms),
            output,
        }
    }
}

#[async_trait]
impl OperationTask for SleepOp {
    fn describe(&self) -> String {
        format!("sleep {:?}", self.delay)
    }

    fn supported_device_types(&self) -> &[DeviceType] {
        &self.types
    }

    fn estimated_usage(&self, _spec: DeviceSpec) -> Resources {
        Resources::zero().with(MEMORY, self.memory)
    }

    fn prepare(&mut self, _context: &ResourceContext) -> Result<(), TaskFailure> {
        Ok(())
    }

    async fn run(&mut self) -> Result<TaskOutput, TaskFailure> {
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

/// Operation that fails its first `failures` attempts, counting every attempt.
pub struct FlakyOp {
    pub memory: u64,
    pub failures: usize,
    pub fatal: bool,
    pub attempts: Arc<AtomicUsize>,
}

impl FlakyOp {
    pub fn always_retryable(attempts: &Arc<AtomicUsize>) -> Self {
        Self {
            memory: 10,
            failures: usize::MAX,
            fatal: false,
            attempts: Arc::clone(attempts),
        }
    }

    pub fn fatal(attempts: &Arc<AtomicUsize>) -> Self {
        Self {
            memory: 10,
            failures: usize::MAX,
            fatal: true,
            attempts: Arc::clone(attempts),
        }
    }

    pub fn failing_times(failures: usize, attempts: &Arc<AtomicUsize>) -> Self {
        Self {
            memory: 10,
            failures,
            fatal: false,
            attempts: Arc::clone(attempts),
        }
    }
}

#[async_trait]
impl OperationTask for FlakyOp {
    fn supported_device_types(&self) -> &[DeviceType] {
        &[DeviceType::Gpu]
    }

    fn estimated_usage(&self, _spec: DeviceSpec) -> Resources {
        Resources::zero().with(MEMORY, self.memory)
    }

    fn prepare(&mut self, _context: &ResourceContext) -> Result<(), TaskFailure> {
        Ok(())
    }

    async fn run(&mut self) -> Result<TaskOutput, TaskFailure> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            if self.fatal {
                return Err(TaskFailure::fatal("bad input shape"));
            }
            return Err(TaskFailure::retryable("out of device memory"));
        }
        Ok(json!({ "attempts": attempt }))
    }
}

/// Operation that holds its grant until a permit is released on `gate`.
pub struct GatedOp {
    pub memory: u64,
    pub gate: Arc<Semaphore>,
    pub started: Arc<AtomicUsize>,
    pub output: Value,
}

#[async_trait]
impl OperationTask for GatedOp {
    fn supported_device_types(&self) -> &[DeviceType] {
        &[DeviceType::Gpu]
    }

    fn estimated_usage(&self, _spec: DeviceSpec) -> Resources {
        Resources::zero().with(MEMORY, self.memory)
    }

    fn prepare(&mut self, _context: &ResourceContext) -> Result<(), TaskFailure> {
        Ok(())
    }

    async fn run(&mut self) -> Result<TaskOutput, TaskFailure> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| TaskFailure::fatal("gate closed"))?;
        permit.forget();
        Ok(self.output.clone())
    }
}

/// Operation that panics inside `run` while holding its grant.
pub struct PanicOp {
    pub memory: u64,
}

#[async_trait]
impl OperationTask for PanicOp {
    fn supported_device_types(&self) -> &[DeviceType] {
        &[DeviceType::Gpu]
    }

    fn estimated_usage(&self, _spec: DeviceSpec) -> Resources {
        Resources::zero().with(MEMORY, self.memory)
    }

    fn prepare(&mut self, _context: &ResourceContext) -> Result<(), TaskFailure> {
        Ok(())
    }

    async fn run(&mut self) -> Result<TaskOutput, TaskFailure> {
        panic!("kernel launch failed");
    }
}

/// Builds `SleepOp`s from `{"memory": n, "delay_ms": n, "value": any}` bodies,
/// and failing ops from `{"fail": "fatal"}`.
pub struct TestFactory;

impl TaskFactory for TestFactory {
    fn build(&self, body: &Value) -> Result<Box<dyn OperationTask>, SchedulerError> {
        if body.get("fail").and_then(Value::as_str) == Some("fatal") {
            return Ok(Box::new(FlakyOp::fatal(&Arc::new(AtomicUsize::new(0)))));
        }
        let memory = body
            .get("memory")
            .and_then(Value::as_u64)
            .ok_or_else(|| SchedulerError::InvalidRequest("missing `memory`".into()))?;
        let delay_ms = body.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
        let value = body.get("value").cloned().unwrap_or(Value::Null);
        Ok(Box::new(SleepOp::gpu(memory, delay_ms, value)))
    }
}

pub fn gpu(id: u32, memory: u64) -> DeviceConfig {
    DeviceConfig {
        device_type: DeviceType::Gpu,
        id,
        capacity: [(MEMORY.to_string(), memory)].into_iter().collect(),
    }
}

pub fn cpu(id: u32, memory: u64) -> DeviceConfig {
    DeviceConfig {
        device_type: DeviceType::Cpu,
        id,
        capacity: [(MEMORY.to_string(), memory)].into_iter().collect(),
    }
}

/// Engine over `devices` with a fast idle wait and an attached journal.
pub fn engine(devices: Vec<DeviceConfig>, policy: SchedulerPolicy) -> (ExecutionEngine, InMemoryAuditSink) {
    init_tracing_with("warn");
    let mut cfg = EngineConfig::with_devices(devices);
    cfg.policy = policy;
    cfg.idle_wait_ms = 5;
    let audit = InMemoryAuditSink::new(4096);
    let engine = build_engine_with_audit(&cfg, TokioSpawner::current(), Some(Arc::new(audit.clone())))
        .expect("valid engine config");
    (engine, audit)
}

/// Spawn the engine's scheduling loop.
pub fn start(engine: &ExecutionEngine) -> tokio::task::JoinHandle<()> {
    let engine = engine.clone();
    tokio::spawn(async move { engine.run().await })
}

/// Poll `cond` every few milliseconds for up to five seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
