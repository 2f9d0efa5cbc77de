//! Events produced by the subsystem.
//!
//! Every event is logged through `tracing` when it is published and then
//! fanned out to subscribers over a `tokio::sync::broadcast` channel. A bus
//! with no subscribers still logs.

use crate::cache::PressureLevel;
use crate::cleanup::CleanupRunSummary;
use crate::profile::{AdjustmentReason, CacheProfile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Default channel capacity. Slow subscribers lag and skip old events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Memory pressure moved to a different level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PressureChanged {
    pub level: PressureLevel,
    pub previous_level: PressureLevel,
    pub usage_percent: f64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A consumer received a new cache profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileAdjusted {
    pub consumer_name: String,
    pub profile: CacheProfile,
    pub reason: AdjustmentReason,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReclaimEvent {
    PressureChanged(PressureChanged),
    ProfileAdjusted(ProfileAdjusted),
    CleanupCompleted(CleanupRunSummary),
}

impl ReclaimEvent {
    fn log(&self) {
        match self {
            ReclaimEvent::PressureChanged(event) => {
                if event.level >= PressureLevel::Critical {
                    warn!(
                        level = %event.level,
                        previous = %event.previous_level,
                        usage_percent = event.usage_percent,
                        "{}",
                        event.message
                    );
                } else {
                    info!(
                        level = %event.level,
                        previous = %event.previous_level,
                        usage_percent = event.usage_percent,
                        "{}",
                        event.message
                    );
                }
            }
            ReclaimEvent::ProfileAdjusted(event) => {
                info!(
                    consumer = %event.consumer_name,
                    profile = %event.profile.name,
                    reason = %event.reason,
                    max_cache_size_bytes = event.profile.max_cache_size_bytes,
                    max_item_count = event.profile.max_item_count,
                    "Cache profile adjusted"
                );
            }
            ReclaimEvent::CleanupCompleted(summary) => {
                info!(
                    level = %summary.level,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    skipped = summary.skipped.len(),
                    items_removed = summary.items_removed,
                    memory_freed_bytes = summary.memory_freed_bytes,
                    duration_ms = summary.duration.as_millis() as u64,
                    "Cleanup completed"
                );
            }
        }
    }
}

/// Publisher side of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ReclaimEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReclaimEvent> {
        self.sender.subscribe()
    }

    /// Log and broadcast `event`. Never fails.
    pub fn publish(&self, event: ReclaimEvent) {
        event.log();
        // No receivers is fine: the event has been logged.
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
