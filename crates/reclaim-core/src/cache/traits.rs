//! Cache configuration, entry, statistics and the seams other components
//! use to drive a cache.

use super::handle::WeakHandle;
use super::pressure::{CacheStrategy, PressureLevel};
use crate::config::{CacheDefaults, ReclaimConfig, MB};
use crate::error::Result;
use crate::profile::CacheProfile;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Limits for a pressure-aware cache. Replaced wholesale whenever a new
/// [`CacheProfile`] is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum total size of cached values in bytes.
    pub max_cache_size_bytes: u64,
    /// Fraction of `max_cache_size_bytes` eviction brings the cache back to.
    pub eviction_threshold: f64,
    /// Memory usage fraction above which a pressure transition forces a reclaim.
    pub auto_reclaim_threshold: f64,
    /// Time-to-live for entries.
    pub ttl: Duration,
    pub max_item_count: usize,
    pub compression_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: CacheDefaults::MAX_CACHE_SIZE_MB * MB,
            eviction_threshold: CacheDefaults::LRU_EVICTION_THRESHOLD,
            auto_reclaim_threshold: CacheDefaults::AUTO_RECLAIM_THRESHOLD,
            ttl: CacheDefaults::DEFAULT_TTL,
            max_item_count: CacheDefaults::MAX_ITEM_COUNT,
            compression_enabled: false,
        }
    }
}

impl CacheConfig {
    /// Config with a size limit in megabytes and default everything else.
    pub fn with_mb_limit(megabytes: u64) -> Self {
        Self {
            max_cache_size_bytes: megabytes * MB,
            ..Default::default()
        }
    }

    pub fn with_eviction_threshold(mut self, threshold: f64) -> Self {
        self.eviction_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_item_count(mut self, max_item_count: usize) -> Self {
        self.max_item_count = max_item_count;
        self
    }

    /// Size the cache is brought back down to by eviction.
    pub fn eviction_target_bytes(&self) -> u64 {
        (self.max_cache_size_bytes as f64 * self.eviction_threshold) as u64
    }
}

impl From<&ReclaimConfig> for CacheConfig {
    fn from(config: &ReclaimConfig) -> Self {
        Self {
            max_cache_size_bytes: config.max_cache_size_bytes(),
            eviction_threshold: config.lru_eviction_threshold,
            auto_reclaim_threshold: config.auto_reclaim_threshold,
            ttl: config.default_ttl(),
            max_item_count: config.max_item_count,
            compression_enabled: false,
        }
    }
}

/// A cached entry. The value itself is only weakly referenced.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub handle: WeakHandle,
    pub size_bytes: u64,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    /// Position in the recency order; larger is more recent.
    pub(crate) recency: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub name: String,
    pub current_size_bytes: u64,
    pub max_size_bytes: u64,
    pub item_count: usize,
    /// Entries whose value is still alive.
    pub alive_count: usize,
    pub max_item_count: usize,
    pub total_accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub eviction_count: u64,
    /// Entries dropped because their value had been reclaimed.
    pub reclaim_count: u64,
    pub expired_count: u64,
    /// Number of `force_reclaim` runs.
    pub force_reclaim_runs: u64,
    pub pressure_transitions: u64,
    pub pressure_level: PressureLevel,
    pub strategy: CacheStrategy,
    pub eviction_threshold: f64,
    pub ttl: Duration,
    pub compression_enabled: bool,
    pub profile_name: Option<String>,
}

impl CacheStats {
    pub fn current_cache_size_mb(&self) -> f64 {
        self.current_size_bytes as f64 / MB as f64
    }

    pub fn max_cache_size_mb(&self) -> f64 {
        self.max_size_bytes as f64 / MB as f64
    }

    /// Hits over total lookups (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Current size over maximum size (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max_size_bytes == 0 {
            0.0
        } else {
            self.current_size_bytes as f64 / self.max_size_bytes as f64
        }
    }
}

/// Result of a sweep over cache entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub scanned: u64,
    pub removed: u64,
    pub freed_bytes: u64,
}

/// Result of LRU eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionOutcome {
    pub evicted: u64,
    pub freed_bytes: u64,
}

/// Result of reconciling the recency index with the entry map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub scanned: u64,
    /// Recency slots pointing at missing or moved entries.
    pub orphaned_slots: u64,
    /// Entries that had no recency slot.
    pub unindexed_entries: u64,
    /// Bytes the size counter was off by before repair.
    pub size_drift_bytes: u64,
}

impl RepairOutcome {
    pub fn repaired(&self) -> u64 {
        self.orphaned_slots + self.unindexed_entries + u64::from(self.size_drift_bytes > 0)
    }
}

/// Result of purging a whole cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeOutcome {
    pub items_processed: u64,
    pub items_removed: u64,
    pub freed_bytes: u64,
}

/// A cache that accepts rescaled profiles from the profile adjuster.
pub trait ProfileConsumer: Send + Sync {
    fn consumer_name(&self) -> &str;

    fn apply_profile(&self, profile: &CacheProfile);
}

/// Current pressure level as last classified by a cache's pressure loop.
pub trait PressureSource: Send + Sync {
    fn pressure_level(&self) -> PressureLevel;
}

/// A cache the cleanup orchestrator may empty under its purge tasks.
pub trait PurgeableCache: Send + Sync {
    fn name(&self) -> &str;

    fn purge(&self) -> Result<PurgeOutcome>;
}
