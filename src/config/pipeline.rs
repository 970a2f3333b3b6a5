//! Dispatch pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Request pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Endpoint the ROUTER socket binds, e.g. `tcp://0.0.0.0:5501`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Bound of the outbound reply queue, and of the replies parked for
    /// one peer that is not accepting writes.
    #[serde(default = "default_send_queue_depth")]
    pub send_queue_depth: usize,
    /// How often the serve loop wakes to check for shutdown.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// How long a reply may stay parked for a peer that is not accepting
    /// writes before it is dropped.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// How long shutdown waits for in-flight replies.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_bind_address() -> String {
    "tcp://127.0.0.1:5501".into()
}

const fn default_send_queue_depth() -> usize {
    128
}

const fn default_poll_timeout_ms() -> u64 {
    100
}

const fn default_send_timeout_ms() -> u64 {
    1_000
}

const fn default_drain_timeout_ms() -> u64 {
    5_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            send_queue_depth: default_send_queue_depth(),
            poll_timeout_ms: default_poll_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    /// Poll timeout as a duration.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Parked reply lifetime as a duration.
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Drain timeout as a duration.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Validate pipeline configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.bind_address.trim().is_empty() {
            return Err("bind_address must not be empty".into());
        }
        if self.send_queue_depth == 0 {
            return Err("send_queue_depth must be greater than 0".into());
        }
        if self.poll_timeout_ms == 0 {
            return Err("poll_timeout_ms must be greater than 0".into());
        }
        if self.send_timeout_ms == 0 {
            return Err("send_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}
