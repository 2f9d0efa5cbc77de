//! Background pressure classification and weak-reference sweeping.

use super::pressure::PressureObservation;
use super::store::PressureAwareCache;
use crate::cancel::CancellationToken;
use crate::events::{EventBus, PressureChanged, ReclaimEvent};
use crate::schedule::PeriodicTask;
use crate::system::{DeviceProbe, DeviceSnapshot};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drives a cache's pressure classifier from a device probe.
///
/// Owns two timers: the pressure check and the weak-reference sweep.
pub struct PressureMonitor {
    cache: Arc<PressureAwareCache>,
    probe: Arc<dyn DeviceProbe>,
    events: EventBus,
    pressure_interval: Duration,
    sweep_interval: Duration,
    last_snapshot: Mutex<Option<DeviceSnapshot>>,
    timers: Mutex<Vec<PeriodicTask>>,
}

impl PressureMonitor {
    pub fn new(
        cache: Arc<PressureAwareCache>,
        probe: Arc<dyn DeviceProbe>,
        events: EventBus,
        pressure_interval: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            cache,
            probe,
            events,
            pressure_interval,
            sweep_interval,
            last_snapshot: Mutex::new(None),
            timers: Mutex::new(Vec::new()),
        }
    }

    /// Read the probe, falling back to the last good snapshot on failure.
    fn read_snapshot(&self) -> Option<DeviceSnapshot> {
        let mut last = self
            .last_snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.probe.snapshot() {
            Ok(snapshot) => {
                *last = Some(snapshot.clone());
                Some(snapshot)
            }
            Err(e) => {
                warn!("Device probe failed, reusing last snapshot: {}", e);
                last.clone()
            }
        }
    }

    pub fn last_snapshot(&self) -> Option<DeviceSnapshot> {
        self.last_snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run one pressure check.
    ///
    /// On a level change the transition is published and, above the
    /// auto-reclaim threshold, a forced reclaim runs. LRU eviction runs
    /// whenever the cache is over its threshold, change or not.
    pub fn check_pressure(&self) -> Option<PressureObservation> {
        let Some(snapshot) = self.read_snapshot() else {
            warn!("No device snapshot available yet, skipping pressure check");
            return None;
        };

        let observation = self.cache.observe_snapshot(&snapshot);

        if observation.changed {
            self.events
                .publish(ReclaimEvent::PressureChanged(PressureChanged {
                    level: observation.level,
                    previous_level: observation.previous,
                    usage_percent: observation.usage_percent,
                    available_bytes: snapshot.available_memory_bytes,
                    used_bytes: snapshot.used_bytes(),
                    timestamp: snapshot.timestamp,
                    message: format!(
                        "Memory pressure {} -> {} ({:.1}% in use, cache strategy {})",
                        observation.previous,
                        observation.level,
                        observation.usage_percent,
                        observation.level.strategy()
                    ),
                }));

            if observation.auto_reclaim {
                self.cache.force_reclaim();
            }
        }

        if observation.over_threshold {
            self.cache.perform_lru_eviction(None);
        }

        Some(observation)
    }

    /// Start the pressure-check and weak-sweep timers. No-op if running.
    pub fn start(self: &Arc<Self>) {
        let mut timers = self
            .timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timers.iter().any(PeriodicTask::is_running) {
            debug!("Pressure monitor already running");
            return;
        }
        timers.clear();

        let token = CancellationToken::new();

        let monitor = Arc::clone(self);
        timers.push(PeriodicTask::spawn(
            "pressure-check",
            self.pressure_interval,
            token.clone(),
            move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.check_pressure();
                }
            },
        ));

        let cache = Arc::clone(&self.cache);
        timers.push(PeriodicTask::spawn(
            "weak-ref-sweep",
            self.sweep_interval,
            token,
            move || {
                let cache = Arc::clone(&cache);
                async move {
                    cache.sweep_reclaimed();
                }
            },
        ));

        info!(
            "Pressure monitor started for {} (check every {:?}, sweep every {:?})",
            self.cache.name(),
            self.pressure_interval,
            self.sweep_interval
        );
    }

    /// Stop both timers.
    pub fn stop(&self) {
        let timers = std::mem::take(
            &mut *self
                .timers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if timers.is_empty() {
            return;
        }
        for timer in &timers {
            timer.stop();
        }
        info!("Pressure monitor stopped for {}", self.cache.name());
    }

    pub fn is_running(&self) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(PeriodicTask::is_running)
    }
}
