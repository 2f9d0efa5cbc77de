//! Memory-pressure-aware cache.
//!
//! A [`PressureAwareCache`] indexes values it does not own: each entry holds
//! a weak reference, so the host's last strong reference decides when a
//! value dies. The cache bounds itself by declared byte size and item count,
//! evicting least-recently-used entries, and shrinks further as the
//! [`PressureMonitor`] reports rising memory pressure.
//!
//! # Example
//!
//! ```rust
//! use reclaim_core::cache::{CacheConfig, PressureAwareCache};
//! use std::sync::Arc;
//!
//! let cache = PressureAwareCache::new("thumbnails", CacheConfig::with_mb_limit(64));
//! let image = Arc::new(vec![0u8; 1024]);
//! cache.put("cover.png", &image, None);
//!
//! let hit: Option<Arc<Vec<u8>>> = cache.get("cover.png");
//! assert!(hit.is_some());
//! ```

mod handle;
mod monitor;
mod pressure;
mod size;
mod store;
mod traits;

pub use handle::WeakHandle;
pub use monitor::PressureMonitor;
pub use pressure::{CacheStrategy, PressureLevel, PressureObservation};
pub use size::EstimateSize;
pub use store::PressureAwareCache;
pub use traits::{
    CacheConfig, CacheEntry, CacheStats, EvictionOutcome, PressureSource, ProfileConsumer,
    PurgeOutcome, PurgeableCache, RepairOutcome, SweepOutcome,
};
