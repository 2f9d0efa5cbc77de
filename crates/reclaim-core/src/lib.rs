//! Reclaim Core - memory-pressure-aware caching for long-running hosts.
//!
//! Three cooperating components keep a process responsive as memory gets
//! scarce:
//! - [`PressureAwareCache`]: a weak-reference LRU cache that sheds entries
//!   as memory pressure rises
//! - [`ProfileAdjuster`]: rescales cache limits from device tier and
//!   current pressure
//! - [`CleanupOrchestrator`]: runs batched, fault-isolated cleanup levels
//!   on schedules or on demand
//!
//! [`ReclaimRuntime`] wires them together around one probe and one event
//! bus.
//!
//! # Example
//!
//! ```rust,no_run
//! use reclaim_core::{ReclaimConfig, ReclaimEvent, ReclaimRuntime};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> reclaim_core::Result<()> {
//!     let runtime = ReclaimRuntime::builder(ReclaimConfig::default()).build()?;
//!     let mut events = runtime.subscribe();
//!     runtime.start();
//!
//!     let thumbnail = Arc::new(vec![0u8; 4096]);
//!     runtime.cache().put("thumb:1", &thumbnail, None);
//!
//!     if let Ok(ReclaimEvent::PressureChanged(change)) = events.recv().await {
//!         println!("pressure is now {}", change.level);
//!     }
//!
//!     runtime.shutdown();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod events;
pub mod profile;
pub mod runtime;
pub mod schedule;
pub mod system;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheStats, EstimateSize, PressureAwareCache, PressureLevel, PressureMonitor,
    ProfileConsumer, PurgeableCache,
};
pub use cancel::CancellationToken;
pub use cleanup::{
    CleanupLevel, CleanupOrchestrator, CleanupRunSummary, CleanupTask, CleanupTaskResult,
    CleanupTaskType,
};
pub use config::ReclaimConfig;
pub use error::{ReclaimError, Result};
pub use events::{EventBus, ReclaimEvent};
pub use profile::{scale_profile, CacheProfile, DeviceTier, ProfileAdjuster};
pub use runtime::{ReclaimRuntime, ReclaimRuntimeBuilder};
pub use system::{DeviceProbe, DeviceSnapshot, StaticProbe, SysinfoProbe};
