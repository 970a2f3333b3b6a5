//! Configuration models for the engine, device pool, and dispatch pipeline.

pub mod engine;
pub mod pipeline;

pub use engine::{DeviceConfig, EngineConfig, SchedulerPolicy};
pub use pipeline::PipelineConfig;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "SCHEDULER_CONFIG";
/// Environment variable overriding the pipeline bind address.
pub const BIND_ADDR_ENV: &str = "SCHEDULER_BIND_ADDR";

/// Root server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Engine and device pool.
    pub engine: EngineConfig,
    /// Request pipeline.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value, prefixed by section.
    pub fn validate(&self) -> Result<(), String> {
        self.engine.validate().map_err(|e| format!("engine invalid: {e}"))?;
        self.pipeline
            .validate()
            .map_err(|e| format!("pipeline invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the file named by `SCHEDULER_CONFIG`, after
    /// reading a `.env` file if present. `SCHEDULER_BIND_ADDR` overrides the
    /// bind address.
    ///
    /// # Errors
    ///
    /// Fails when the variable is unset, the file cannot be read, or the
    /// contents do not parse and validate.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_PATH_ENV)
            .with_context(|| format!("{CONFIG_PATH_ENV} is not set"))?;
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file `{path}`"))?;
        let mut cfg = Self::from_json_str(&raw).map_err(anyhow::Error::msg)?;
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
            cfg.pipeline.bind_address = addr;
            cfg.validate().map_err(anyhow::Error::msg)?;
        }
        Ok(cfg)
    }
}
