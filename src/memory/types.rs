use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// One point-in-time memory measurement.
///
/// Snapshots are produced once per sampling cycle and never mutated afterwards. The engine keeps the most recent
/// one and hands copies to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Memory currently in use, in bytes
    pub used: u64,
    /// Memory still available for allocation, in bytes
    pub available: u64,
    /// Upper bound on memory the host can use, in bytes
    pub max: u64,
    /// When the measurement was taken
    pub timestamp: SystemTime,
}

impl MemorySnapshot {
    /// Creates a snapshot stamped with the current time
    pub fn new(used: u64, available: u64, max: u64) -> Self {
        Self::with_timestamp(used, available, max, SystemTime::now())
    }

    /// Creates a snapshot with an explicit timestamp
    pub fn with_timestamp(used: u64, available: u64, max: u64, timestamp: SystemTime) -> Self {
        Self { used, available, max, timestamp }
    }

    /// Fraction of `max` still available, always within `[0, 1]`.
    ///
    /// A snapshot with `max == 0` reports `0.0`: nothing is available out of nothing.
    pub fn available_ratio(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.available as f64 / self.max as f64).clamp(0.0, 1.0)
    }

    /// Fraction of `max` in use, always within `[0, 1]`
    pub fn used_ratio(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.used as f64 / self.max as f64).clamp(0.0, 1.0)
    }
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "used={} available={} max={} ({:.1}% available)",
            self.used,
            self.available,
            self.max,
            self.available_ratio() * 100.0
        )
    }
}

/// Hysteresis sub-state of a running monitor
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryState {
    /// Available memory is at or above the low-memory trigger
    #[default]
    Normal,
    /// Available memory dropped below the low-memory trigger
    Low,
}

impl fmt::Display for MemoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Low => write!(f, "Low"),
        }
    }
}
