//! Device and memory probing.
//!
//! A [`DeviceProbe`] supplies point-in-time [`DeviceSnapshot`] readings. The
//! pressure monitor and the profile adjuster only ever see snapshots, never
//! the probe's internal state.

use crate::config::MB;
use crate::error::{ReclaimError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use sysinfo::System;
use tracing::debug;

/// Point-in-time device reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Coarse device performance score (0-100).
    pub performance_score: u8,
    /// Memory currently available to applications, in bytes.
    pub available_memory_bytes: u64,
    /// Physical memory, in bytes.
    pub total_memory_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl DeviceSnapshot {
    pub fn new(performance_score: u8, available_memory_bytes: u64, total_memory_bytes: u64) -> Self {
        Self {
            performance_score: performance_score.min(100),
            available_memory_bytes: available_memory_bytes.min(total_memory_bytes),
            total_memory_bytes,
            timestamp: Utc::now(),
        }
    }

    /// Memory in use, in bytes.
    pub fn used_bytes(&self) -> u64 {
        self.total_memory_bytes
            .saturating_sub(self.available_memory_bytes)
    }

    /// Memory usage as a percentage (0-100). Zero when total is unknown.
    pub fn usage_percent(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            0.0
        } else {
            self.used_bytes() as f64 / self.total_memory_bytes as f64 * 100.0
        }
    }
}

/// Source of device snapshots.
pub trait DeviceProbe: Send + Sync {
    /// Take a fresh reading. Callers fall back to their last snapshot on error.
    fn snapshot(&self) -> Result<DeviceSnapshot>;
}

/// Score a device from its physical memory and logical core count.
///
/// Memory contributes up to 60 points (saturating at 16 GiB), cores up to
/// 40 points (saturating at 8).
pub fn performance_score(total_memory_bytes: u64, logical_cores: usize) -> u8 {
    let gib = total_memory_bytes as f64 / (1024 * MB) as f64;
    let memory_points = (gib / 16.0).min(1.0) * 60.0;
    let cpu_points = (logical_cores as f64 / 8.0).min(1.0) * 40.0;
    (memory_points + cpu_points).round().clamp(0.0, 100.0) as u8
}

/// Probe backed by `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    logical_cores: usize,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();
        let logical_cores = system.cpus().len().max(1);
        debug!("sysinfo probe initialized with {} logical cores", logical_cores);

        Self {
            system: Mutex::new(system),
            logical_cores,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProbe for SysinfoProbe {
    fn snapshot(&self) -> Result<DeviceSnapshot> {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(ReclaimError::Probe {
                message: "sysinfo reported zero total memory".to_string(),
            });
        }

        Ok(DeviceSnapshot::new(
            performance_score(total, self.logical_cores),
            system.available_memory(),
            total,
        ))
    }
}

#[derive(Debug)]
struct StaticProbeState {
    snapshot: DeviceSnapshot,
    failing: bool,
    reads: u64,
}

/// Probe returning a settable snapshot. Used by tests and by hosts that
/// gather readings themselves.
#[derive(Debug)]
pub struct StaticProbe {
    state: Mutex<StaticProbeState>,
}

impl StaticProbe {
    pub fn new(snapshot: DeviceSnapshot) -> Self {
        Self {
            state: Mutex::new(StaticProbeState {
                snapshot,
                failing: false,
                reads: 0,
            }),
        }
    }

    /// Probe reporting `usage_percent` of `total_memory_bytes` in use.
    pub fn with_usage(performance_score: u8, total_memory_bytes: u64, usage_percent: f64) -> Self {
        Self::new(snapshot_at_usage(
            performance_score,
            total_memory_bytes,
            usage_percent,
        ))
    }

    pub fn set_snapshot(&self, snapshot: DeviceSnapshot) {
        self.lock().snapshot = snapshot;
    }

    /// Change the reported usage, keeping score and total.
    pub fn set_usage_percent(&self, usage_percent: f64) {
        let mut state = self.lock();
        state.snapshot = snapshot_at_usage(
            state.snapshot.performance_score,
            state.snapshot.total_memory_bytes,
            usage_percent,
        );
    }

    pub fn set_performance_score(&self, score: u8) {
        self.lock().snapshot.performance_score = score.min(100);
    }

    /// Make subsequent reads fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Number of read attempts so far, failed ones included.
    pub fn reads(&self) -> u64 {
        self.lock().reads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticProbeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DeviceProbe for StaticProbe {
    fn snapshot(&self) -> Result<DeviceSnapshot> {
        let mut state = self.lock();
        state.reads += 1;
        if state.failing {
            return Err(ReclaimError::Probe {
                message: "static probe set to fail".to_string(),
            });
        }
        let mut snapshot = state.snapshot.clone();
        snapshot.timestamp = Utc::now();
        Ok(snapshot)
    }
}

fn snapshot_at_usage(performance_score: u8, total: u64, usage_percent: f64) -> DeviceSnapshot {
    let used = (total as f64 * usage_percent.clamp(0.0, 100.0) / 100.0).round() as u64;
    DeviceSnapshot::new(performance_score, total.saturating_sub(used), total)
}
