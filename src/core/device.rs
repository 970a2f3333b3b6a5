//! Device identities used as ledger keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Host CPU.
    Cpu,
    /// Accelerator GPU.
    Gpu,
}

impl DeviceType {
    /// Short upper-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A specific compute unit: type plus ordinal. Immutable value, equality and
/// hashing by `(device_type, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Kind of device.
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Ordinal within its type.
    pub id: u32,
}

impl DeviceSpec {
    /// Create a device spec.
    #[must_use]
    pub const fn new(device_type: DeviceType, id: u32) -> Self {
        Self { device_type, id }
    }

    /// Shorthand for `CPU:id`.
    #[must_use]
    pub const fn cpu(id: u32) -> Self {
        Self::new(DeviceType::Cpu, id)
    }

    /// Shorthand for `GPU:id`.
    #[must_use]
    pub const fn gpu(id: u32) -> Self {
        Self::new(DeviceType::Gpu, id)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_type, self.id)
    }
}
