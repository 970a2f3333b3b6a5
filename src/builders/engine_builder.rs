//! Builds an execution engine from configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::{EngineConfig, SchedulerPolicy};
use crate::core::{
    AuditSink, EngineOptions, ExecutionEngine, FairScheduler, FifoScheduler, ResourceLedger,
    Scheduler, SchedulerError,
};
use crate::runtime::TokioSpawner;

/// Instantiate the configured policy.
#[must_use]
pub fn build_scheduler(cfg: &EngineConfig) -> Box<dyn Scheduler> {
    match cfg.policy {
        SchedulerPolicy::Fair => Box::new(FairScheduler::new(cfg.usage_decay)),
        SchedulerPolicy::Fifo => Box::new(FifoScheduler),
    }
}

/// Build the ledger from the device inventory.
#[must_use]
pub fn build_ledger(cfg: &EngineConfig) -> ResourceLedger {
    ResourceLedger::new(cfg.devices.iter().map(|d| (d.spec(), d.capacity())))
}

/// Build an engine from validated configuration.
///
/// # Errors
///
/// Returns `SchedulerError::Config` when the configuration is invalid.
pub fn build_engine(
    cfg: &EngineConfig,
    spawner: TokioSpawner,
) -> Result<ExecutionEngine, SchedulerError> {
    build_engine_with_audit(cfg, spawner, None)
}

/// Like [`build_engine`], attaching a scheduling journal.
///
/// # Errors
///
/// Returns `SchedulerError::Config` when the configuration is invalid.
pub fn build_engine_with_audit(
    cfg: &EngineConfig,
    spawner: TokioSpawner,
    audit: Option<Arc<dyn AuditSink>>,
) -> Result<ExecutionEngine, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::Config(format!("config invalid: {e}")))?;

    let options = EngineOptions {
        max_failures: cfg.max_failures,
        round_budget: cfg.round_budget,
        idle_wait: cfg.idle_wait(),
        audit,
    };
    let engine = ExecutionEngine::new(build_ledger(cfg), build_scheduler(cfg), options, spawner);
    info!(
        policy = engine.policy(),
        devices = cfg.devices.len(),
        max_failures = cfg.max_failures,
        "engine built"
    );
    Ok(engine)
}
