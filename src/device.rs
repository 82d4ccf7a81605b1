//! Device identity shared between the backend seam and the harness.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of device a backend exposes.
///
/// The native backend only exposes virtual CPU devices; hardware kinds
/// belong to real accelerator backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "CPU",
        }
    }
}

/// A single execution device: kind plus ordinal within that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub ordinal: usize,
}

impl Device {
    /// CPU device with the given ordinal.
    pub fn cpu(ordinal: usize) -> Self {
        Self {
            kind: DeviceKind::Cpu,
            ordinal,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.ordinal)
    }
}

/// The device used when a caller does not pick one explicitly.
pub fn default_device() -> Device {
    Device::cpu(0)
}
