//! Centralized configuration for the reclaim subsystem.
//!
//! Numeric thresholds live in constant tables; everything a host may tune
//! lives in [`ReclaimConfig`], which deserializes from JSON with every field
//! optional.

use crate::cleanup::CleanupLevel;
use crate::error::{ReclaimError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bytes per megabyte as used by every size option in this crate.
pub const MB: u64 = 1024 * 1024;

/// Memory usage thresholds (percent of total) for pressure classification.
pub struct PressureThresholds;

impl PressureThresholds {
    pub const WARNING_PERCENT: f64 = 60.0;
    pub const CRITICAL_PERCENT: f64 = 75.0;
    pub const EMERGENCY_PERCENT: f64 = 85.0;
}

/// Defaults for the pressure-aware cache.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const MAX_CACHE_SIZE_MB: u64 = 64;
    pub const LRU_EVICTION_THRESHOLD: f64 = 0.8;
    pub const AUTO_RECLAIM_THRESHOLD: f64 = 0.85;
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
    pub const MAX_ITEM_COUNT: usize = 500;
    pub const PRESSURE_CHECK_INTERVAL: Duration = Duration::from_secs(10);
    pub const WEAK_REF_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
}

/// Limits applied when rescaling cache profiles.
pub struct ProfileDefaults;

impl ProfileDefaults {
    pub const MIN_CACHE_SIZE_BYTES: u64 = 16 * MB;
    pub const MIN_EVICTION_THRESHOLD: f64 = 0.5;
    pub const AVAILABLE_MEMORY_CHANGE_THRESHOLD: f64 = 0.2;
    pub const ADJUSTMENT_INTERVAL: Duration = Duration::from_secs(30);
}

/// Defaults for the cleanup orchestrator.
pub struct CleanupDefaults;

impl CleanupDefaults {
    pub const MAX_PARALLEL_TASKS: usize = 3;
    pub const BATCH_DELAY: Duration = Duration::from_millis(100);
    pub const HISTORY_CAP: usize = 100;
    pub const EPHEMERAL_FILE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
    pub const QUICK_INTERVAL: Duration = Duration::from_secs(5 * 60);
    pub const DEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
    pub const EPHEMERAL_DIR_NAME: &'static str = "reclaim";
}

/// Host-tunable options for the whole subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ReclaimConfig {
    /// Capacity of the primary cache in megabytes. Only in effect with
    /// `adaptive_profiles` off; otherwise the tier profile replaces it at
    /// build time.
    pub max_cache_size_mb: u64,
    pub pressure_check_interval_secs: u64,
    /// Fraction of capacity LRU eviction brings the cache back down to.
    /// Replaced by the profile threshold when `adaptive_profiles` is on.
    pub lru_eviction_threshold: f64,
    /// Memory usage fraction above which a pressure transition forces a reclaim.
    pub auto_reclaim_threshold: f64,
    pub weak_ref_cleanup_interval_secs: u64,
    pub adjustment_interval_secs: u64,
    /// Cleanup levels run on a timer, with their interval in seconds.
    pub cleanup_level_schedules: BTreeMap<CleanupLevel, u64>,
    pub max_parallel_cleanup_tasks: usize,
    /// Pause inserted between cleanup batches.
    pub cleanup_batch_delay_ms: u64,
    pub ephemeral_file_ttl_secs: u64,
    /// Directory swept by the ephemeral-file purge. Defaults to a
    /// subdirectory of the OS temp dir.
    pub ephemeral_dir: Option<PathBuf>,
    /// Entry TTL of the primary cache. Replaced by the profile TTL when
    /// `adaptive_profiles` is on.
    pub default_ttl_secs: u64,
    /// Item cap of the primary cache. Replaced by the profile item count
    /// when `adaptive_profiles` is on.
    pub max_item_count: usize,
    /// Relative change in available memory that forces a profile adjustment.
    pub available_memory_change_threshold: f64,
    /// Register the primary cache with the profile adjuster. The adjuster
    /// then owns the cache's size, threshold, TTL and item limits.
    pub adaptive_profiles: bool,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        let mut schedules = BTreeMap::new();
        schedules.insert(
            CleanupLevel::Quick,
            CleanupDefaults::QUICK_INTERVAL.as_secs(),
        );
        schedules.insert(CleanupLevel::Deep, CleanupDefaults::DEEP_INTERVAL.as_secs());

        Self {
            max_cache_size_mb: CacheDefaults::MAX_CACHE_SIZE_MB,
            pressure_check_interval_secs: CacheDefaults::PRESSURE_CHECK_INTERVAL.as_secs(),
            lru_eviction_threshold: CacheDefaults::LRU_EVICTION_THRESHOLD,
            auto_reclaim_threshold: CacheDefaults::AUTO_RECLAIM_THRESHOLD,
            weak_ref_cleanup_interval_secs: CacheDefaults::WEAK_REF_CLEANUP_INTERVAL.as_secs(),
            adjustment_interval_secs: ProfileDefaults::ADJUSTMENT_INTERVAL.as_secs(),
            cleanup_level_schedules: schedules,
            max_parallel_cleanup_tasks: CleanupDefaults::MAX_PARALLEL_TASKS,
            cleanup_batch_delay_ms: CleanupDefaults::BATCH_DELAY.as_millis() as u64,
            ephemeral_file_ttl_secs: CleanupDefaults::EPHEMERAL_FILE_TTL.as_secs(),
            ephemeral_dir: None,
            default_ttl_secs: CacheDefaults::DEFAULT_TTL.as_secs(),
            max_item_count: CacheDefaults::MAX_ITEM_COUNT,
            available_memory_change_threshold: ProfileDefaults::AVAILABLE_MEMORY_CHANGE_THRESHOLD,
            adaptive_profiles: true,
        }
    }
}

impl ReclaimConfig {
    /// Parse a configuration from a JSON string. Missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ReclaimError::io_with_path(e, path))?;
        Self::from_json_str(&contents)
    }

    /// Check that intervals are non-zero and fractions lie in (0, 1].
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("pressure_check_interval_secs", self.pressure_check_interval_secs),
            ("weak_ref_cleanup_interval_secs", self.weak_ref_cleanup_interval_secs),
            ("adjustment_interval_secs", self.adjustment_interval_secs),
            ("ephemeral_file_ttl_secs", self.ephemeral_file_ttl_secs),
            ("default_ttl_secs", self.default_ttl_secs),
            ("max_cache_size_mb", self.max_cache_size_mb),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(validation(field, "must be greater than zero"));
            }
        }

        let fractions = [
            ("lru_eviction_threshold", self.lru_eviction_threshold),
            ("auto_reclaim_threshold", self.auto_reclaim_threshold),
            (
                "available_memory_change_threshold",
                self.available_memory_change_threshold,
            ),
        ];
        for (field, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(validation(field, "must be within (0, 1]"));
            }
        }

        if self.max_parallel_cleanup_tasks == 0 {
            return Err(validation("max_parallel_cleanup_tasks", "must be at least 1"));
        }
        if self.max_item_count == 0 {
            return Err(validation("max_item_count", "must be at least 1"));
        }
        if let Some((level, _)) = self
            .cleanup_level_schedules
            .iter()
            .find(|(_, secs)| **secs == 0)
        {
            return Err(validation(
                "cleanup_level_schedules",
                &format!("interval for {} must be greater than zero", level),
            ));
        }

        Ok(())
    }

    pub fn max_cache_size_bytes(&self) -> u64 {
        self.max_cache_size_mb.saturating_mul(MB)
    }

    pub fn pressure_check_interval(&self) -> Duration {
        Duration::from_secs(self.pressure_check_interval_secs)
    }

    pub fn weak_ref_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.weak_ref_cleanup_interval_secs)
    }

    pub fn adjustment_interval(&self) -> Duration {
        Duration::from_secs(self.adjustment_interval_secs)
    }

    pub fn cleanup_batch_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_batch_delay_ms)
    }

    pub fn ephemeral_file_ttl(&self) -> Duration {
        Duration::from_secs(self.ephemeral_file_ttl_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Scheduled cleanup levels with their intervals.
    pub fn cleanup_schedules(&self) -> Vec<(CleanupLevel, Duration)> {
        self.cleanup_level_schedules
            .iter()
            .map(|(level, secs)| (*level, Duration::from_secs(*secs)))
            .collect()
    }

    /// Directory swept by the ephemeral-file purge.
    pub fn ephemeral_dir(&self) -> PathBuf {
        self.ephemeral_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(CleanupDefaults::EPHEMERAL_DIR_NAME))
    }
}

fn validation(field: &str, message: &str) -> ReclaimError {
    ReclaimError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}
