//! Device inventory and scheduling policy configuration.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{DeviceSpec, DeviceType, Resources, DEFAULT_MAX_FAILURES};

/// Scheduling policy selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPolicy {
    /// Least aggregate usage first.
    #[default]
    Fair,
    /// Session creation order.
    Fifo,
}

/// One device in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device kind.
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Ordinal within the kind.
    pub id: u32,
    /// Capacity per resource dimension.
    pub capacity: BTreeMap<String, u64>,
}

impl DeviceConfig {
    /// Device identity.
    #[must_use]
    pub const fn spec(&self) -> DeviceSpec {
        DeviceSpec::new(self.device_type, self.id)
    }

    /// Capacity as a resource map.
    #[must_use]
    pub fn capacity(&self) -> Resources {
        self.capacity.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Device inventory.
    pub devices: Vec<DeviceConfig>,
    /// Scheduling policy.
    #[serde(default)]
    pub policy: SchedulerPolicy,
    /// Retries granted to a retryable failure.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// Maximum admissions per scheduling round.
    #[serde(default = "default_round_budget")]
    pub round_budget: usize,
    /// Idle wait between rounds when nothing wakes the loop.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    /// Multiplier applied to every session's aggregate usage each round.
    #[serde(default = "default_usage_decay")]
    pub usage_decay: f64,
}

const fn default_max_failures() -> u32 {
    DEFAULT_MAX_FAILURES
}

const fn default_round_budget() -> usize {
    64
}

const fn default_idle_wait_ms() -> u64 {
    50
}

const fn default_usage_decay() -> f64 {
    1.0
}

impl EngineConfig {
    /// Config with the given devices and default tunables.
    #[must_use]
    pub fn with_devices(devices: Vec<DeviceConfig>) -> Self {
        Self {
            devices,
            policy: SchedulerPolicy::default(),
            max_failures: default_max_failures(),
            round_budget: default_round_budget(),
            idle_wait_ms: default_idle_wait_ms(),
            usage_decay: default_usage_decay(),
        }
    }

    /// Idle wait as a duration.
    #[must_use]
    pub const fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Validate engine configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.devices.is_empty() {
            return Err("at least one device must be defined".into());
        }
        let mut seen = HashSet::new();
        for device in &self.devices {
            let spec = device.spec();
            if !seen.insert(spec) {
                return Err(format!("device `{spec}` defined twice"));
            }
            if device.capacity.values().all(|v| *v == 0) {
                return Err(format!("device `{spec}` has no capacity"));
            }
        }
        if self.round_budget == 0 {
            return Err("round_budget must be greater than 0".into());
        }
        if self.idle_wait_ms == 0 {
            return Err("idle_wait_ms must be greater than 0".into());
        }
        if !(self.usage_decay > 0.0 && self.usage_decay <= 1.0) {
            return Err("usage_decay must be in (0, 1]".into());
        }
        Ok(())
    }
}
