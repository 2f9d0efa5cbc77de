//! Periodic profile adjustment with a hysteresis gate.
//!
//! The adjuster reads the device probe for tier and available memory, takes
//! the pressure level from the cache's own classification when a
//! [`PressureSource`] is attached, and only recomputes when something
//! meaningful moved:
//! - the first run
//! - the device tier changed
//! - the pressure level changed
//! - available memory shifted by more than the configured fraction
//!
//! One rescaled profile is computed per adjustment and handed to every
//! registered consumer.

use super::scaling::{scale_profile, CacheProfile};
use super::tier::DeviceTier;
use crate::cache::{PressureLevel, PressureSource, ProfileConsumer};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::events::{EventBus, ProfileAdjusted, ReclaimEvent};
use crate::schedule::PeriodicTask;
use crate::system::{DeviceProbe, DeviceSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why an adjustment ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    FirstRun,
    TierChanged,
    PressureChanged,
    MemoryShift,
    Forced,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::FirstRun => "first_run",
            AdjustmentReason::TierChanged => "tier_changed",
            AdjustmentReason::PressureChanged => "pressure_changed",
            AdjustmentReason::MemoryShift => "memory_shift",
            AdjustmentReason::Forced => "forced",
        }
    }
}

impl std::fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of the last applied adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentBasis {
    pub tier: DeviceTier,
    pub level: PressureLevel,
    pub available_memory_bytes: u64,
}

impl AdjustmentBasis {
    /// Basis with the pressure level classified from the snapshot itself.
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Self {
        Self::with_level(
            snapshot,
            PressureLevel::from_usage_percent(snapshot.usage_percent()),
        )
    }

    /// Basis with a pressure level classified elsewhere.
    pub fn with_level(snapshot: &DeviceSnapshot, level: PressureLevel) -> Self {
        Self {
            tier: DeviceTier::from_score(snapshot.performance_score),
            level,
            available_memory_bytes: snapshot.available_memory_bytes,
        }
    }
}

/// Decide whether `current` differs enough from `last` to recompute.
///
/// Returns `None` when the adjustment should be skipped.
pub fn adjustment_reason(
    last: Option<&AdjustmentBasis>,
    current: &AdjustmentBasis,
    memory_change_threshold: f64,
) -> Option<AdjustmentReason> {
    let Some(last) = last else {
        return Some(AdjustmentReason::FirstRun);
    };

    if last.tier != current.tier {
        return Some(AdjustmentReason::TierChanged);
    }
    if last.level != current.level {
        return Some(AdjustmentReason::PressureChanged);
    }

    let previous = last.available_memory_bytes as f64;
    let delta = (current.available_memory_bytes as f64 - previous).abs();
    let shifted = if previous == 0.0 {
        delta > 0.0
    } else {
        delta / previous > memory_change_threshold
    };
    shifted.then_some(AdjustmentReason::MemoryShift)
}

/// Adjuster statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjusterStats {
    pub adjustments_applied: u64,
    pub adjustments_skipped: u64,
    pub probe_failures: u64,
    pub consumer_count: usize,
    pub current_tier: Option<DeviceTier>,
    pub current_level: Option<PressureLevel>,
    pub current_profile: Option<CacheProfile>,
}

struct RegisteredConsumer {
    name: String,
    tier: DeviceTier,
    consumer: Arc<dyn ProfileConsumer>,
}

#[derive(Default)]
struct AdjusterState {
    consumers: Vec<RegisteredConsumer>,
    last_basis: Option<AdjustmentBasis>,
    current_profile: Option<CacheProfile>,
}

/// Recomputes cache profiles from device state and pushes them to
/// registered consumers.
pub struct ProfileAdjuster {
    probe: Arc<dyn DeviceProbe>,
    pressure: Option<Arc<dyn PressureSource>>,
    events: EventBus,
    interval: Duration,
    memory_change_threshold: f64,
    state: Mutex<AdjusterState>,
    adjustments_applied: AtomicU64,
    adjustments_skipped: AtomicU64,
    probe_failures: AtomicU64,
    timer: Mutex<Option<PeriodicTask>>,
}

impl ProfileAdjuster {
    pub fn new(
        probe: Arc<dyn DeviceProbe>,
        events: EventBus,
        interval: Duration,
        memory_change_threshold: f64,
    ) -> Self {
        Self {
            probe,
            pressure: None,
            events,
            interval,
            memory_change_threshold,
            state: Mutex::new(AdjusterState::default()),
            adjustments_applied: AtomicU64::new(0),
            adjustments_skipped: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
            timer: Mutex::new(None),
        }
    }

    /// Take the pressure level from `source` instead of classifying each
    /// probe reading.
    pub fn with_pressure_source(mut self, source: Arc<dyn PressureSource>) -> Self {
        self.pressure = Some(source);
        self
    }

    fn basis(&self, snapshot: &DeviceSnapshot) -> AdjustmentBasis {
        match &self.pressure {
            Some(source) => AdjustmentBasis::with_level(snapshot, source.pressure_level()),
            None => AdjustmentBasis::from_snapshot(snapshot),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdjusterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a consumer and hand it the base profile for `tier`.
    ///
    /// Registering an existing name replaces the previous consumer in place.
    pub fn register_consumer(
        &self,
        name: impl Into<String>,
        tier: DeviceTier,
        consumer: Arc<dyn ProfileConsumer>,
    ) {
        let name = name.into();
        let base = CacheProfile::base(tier);

        {
            let mut state = self.lock();
            let registered = RegisteredConsumer {
                name: name.clone(),
                tier,
                consumer: Arc::clone(&consumer),
            };
            match state.consumers.iter_mut().find(|c| c.name == name) {
                Some(existing) => *existing = registered,
                None => state.consumers.push(registered),
            }
        }

        consumer.apply_profile(&base);
        info!("Registered cache consumer {} at tier {}", name, tier);
    }

    /// Returns true if a consumer was removed.
    pub fn unregister_consumer(&self, name: &str) -> bool {
        let mut state = self.lock();
        let before = state.consumers.len();
        state.consumers.retain(|c| c.name != name);
        let removed = state.consumers.len() != before;
        if removed {
            debug!("Unregistered cache consumer {}", name);
        }
        removed
    }

    /// Registered consumer names with their registration tier, in
    /// registration order.
    pub fn consumers(&self) -> Vec<(String, DeviceTier)> {
        self.lock()
            .consumers
            .iter()
            .map(|c| (c.name.clone(), c.tier))
            .collect()
    }

    /// Run one gated adjustment.
    ///
    /// Returns the new profile, or `None` if the gate held or the probe
    /// could not be read.
    pub fn trigger_adjustment(&self) -> Option<CacheProfile> {
        let snapshot = match self.probe.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.probe_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping profile adjustment, device probe failed: {}", e);
                return None;
            }
        };

        let basis = self.basis(&snapshot);
        let reason = {
            let state = self.lock();
            adjustment_reason(
                state.last_basis.as_ref(),
                &basis,
                self.memory_change_threshold,
            )
        };

        match reason {
            Some(reason) => Some(self.apply(basis, reason)),
            None => {
                self.adjustments_skipped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Profile adjustment skipped (tier {}, pressure {})",
                    basis.tier, basis.level
                );
                None
            }
        }
    }

    /// Recompute and broadcast regardless of the gate.
    pub fn force_adjustment(&self) -> Result<CacheProfile> {
        let snapshot = self.probe.snapshot().inspect_err(|_| {
            self.probe_failures.fetch_add(1, Ordering::Relaxed);
        })?;
        Ok(self.apply(self.basis(&snapshot), AdjustmentReason::Forced))
    }

    fn apply(&self, basis: AdjustmentBasis, reason: AdjustmentReason) -> CacheProfile {
        let profile = scale_profile(&CacheProfile::base(basis.tier), basis.level);

        let consumers: Vec<(String, Arc<dyn ProfileConsumer>)> = {
            let mut state = self.lock();
            state.last_basis = Some(basis);
            state.current_profile = Some(profile.clone());
            state
                .consumers
                .iter()
                .map(|c| (c.name.clone(), Arc::clone(&c.consumer)))
                .collect()
        };

        self.adjustments_applied.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Adjusting {} consumers to {} ({})",
            consumers.len(),
            profile.name,
            reason
        );

        for (name, consumer) in consumers {
            consumer.apply_profile(&profile);
            self.events
                .publish(ReclaimEvent::ProfileAdjusted(ProfileAdjusted {
                    consumer_name: name,
                    profile: profile.clone(),
                    reason,
                }));
        }

        profile
    }

    pub fn current_profile(&self) -> Option<CacheProfile> {
        self.lock().current_profile.clone()
    }

    pub fn stats(&self) -> AdjusterStats {
        let state = self.lock();
        AdjusterStats {
            adjustments_applied: self.adjustments_applied.load(Ordering::Relaxed),
            adjustments_skipped: self.adjustments_skipped.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            consumer_count: state.consumers.len(),
            current_tier: state.last_basis.map(|b| b.tier),
            current_level: state.last_basis.map(|b| b.level),
            current_profile: state.current_profile.clone(),
        }
    }

    /// Start the periodic adjustment timer. No-op if running.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timer.as_ref().is_some_and(PeriodicTask::is_running) {
            return;
        }

        let adjuster = Arc::clone(self);
        *timer = Some(PeriodicTask::spawn(
            "profile-adjustment",
            self.interval,
            CancellationToken::new(),
            move || {
                let adjuster = Arc::clone(&adjuster);
                async move {
                    adjuster.trigger_adjustment();
                }
            },
        ));
        info!("Profile adjuster started (every {:?})", self.interval);
    }

    pub fn stop(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(timer) = timer {
            timer.stop();
            info!("Profile adjuster stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(PeriodicTask::is_running)
    }
}
