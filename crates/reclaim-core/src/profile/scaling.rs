//! Base cache profiles and pressure scaling.

use super::tier::DeviceTier;
use crate::cache::PressureLevel;
use crate::config::{ProfileDefaults, MB};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits handed to a cache consumer. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheProfile {
    pub name: String,
    pub max_cache_size_bytes: u64,
    pub ttl: Duration,
    pub max_item_count: usize,
    pub eviction_threshold: f64,
    pub compression_enabled: bool,
}

impl CacheProfile {
    /// Unscaled profile for a device tier.
    pub fn base(tier: DeviceTier) -> Self {
        let (size_mb, ttl_secs, max_item_count, eviction_threshold) = match tier {
            DeviceTier::LowEnd => (32, 10 * 60, 100, 0.6),
            DeviceTier::MidRange => (128, 30 * 60, 500, 0.75),
            DeviceTier::HighEnd => (512, 2 * 60 * 60, 2000, 0.85),
            DeviceTier::Ultimate => (1024, 6 * 60 * 60, 5000, 0.9),
        };

        Self {
            name: tier.as_str().to_string(),
            max_cache_size_bytes: size_mb * MB,
            ttl: Duration::from_secs(ttl_secs),
            max_item_count,
            eviction_threshold,
            compression_enabled: tier == DeviceTier::LowEnd,
        }
    }

    pub fn max_cache_size_mb(&self) -> f64 {
        self.max_cache_size_bytes as f64 / MB as f64
    }
}

/// Multipliers applied to a base profile at a pressure level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingFactors {
    pub cache_size: f64,
    pub eviction_threshold: f64,
    pub ttl: f64,
}

impl ScalingFactors {
    pub fn for_level(level: PressureLevel) -> Self {
        let (cache_size, eviction_threshold, ttl) = match level {
            PressureLevel::Normal => (1.0, 1.0, 1.0),
            PressureLevel::Warning => (0.8, 0.9, 0.7),
            PressureLevel::Critical => (0.6, 0.8, 0.5),
            PressureLevel::Emergency => (0.4, 0.7, 0.3),
        };
        Self {
            cache_size,
            eviction_threshold,
            ttl,
        }
    }
}

/// Rescale `base` for the given pressure level.
///
/// Size is clamped to at least 16 MB and the eviction threshold to at
/// least 0.5. Item count follows the size ratio actually applied, so a
/// clamped size also keeps more items.
pub fn scale_profile(base: &CacheProfile, level: PressureLevel) -> CacheProfile {
    let factors = ScalingFactors::for_level(level);

    let scaled_size = (base.max_cache_size_bytes as f64 * factors.cache_size).round() as u64;
    let max_cache_size_bytes = scaled_size.max(ProfileDefaults::MIN_CACHE_SIZE_BYTES);

    let size_ratio = if base.max_cache_size_bytes == 0 {
        1.0
    } else {
        max_cache_size_bytes as f64 / base.max_cache_size_bytes as f64
    };
    let max_item_count = ((base.max_item_count as f64 * size_ratio).round() as usize).max(1);

    let eviction_threshold = (base.eviction_threshold * factors.eviction_threshold)
        .max(ProfileDefaults::MIN_EVICTION_THRESHOLD);

    let ttl_millis = (base.ttl.as_millis() as f64 * factors.ttl).round() as u64;

    CacheProfile {
        name: format!("{}/{}", base.name, level),
        max_cache_size_bytes,
        ttl: Duration::from_millis(ttl_millis),
        max_item_count,
        eviction_threshold,
        compression_enabled: base.compression_enabled || level >= PressureLevel::Warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_profiles() {
        let low = CacheProfile::base(DeviceTier::LowEnd);
        assert_eq!(low.max_cache_size_bytes, 32 * MB);
        assert_eq!(low.ttl, Duration::from_secs(600));
        assert_eq!(low.max_item_count, 100);
        assert!(low.compression_enabled);

        let ultimate = CacheProfile::base(DeviceTier::Ultimate);
        assert_eq!(ultimate.max_cache_size_bytes, 1024 * MB);
        assert_eq!(ultimate.eviction_threshold, 0.9);
        assert!(!ultimate.compression_enabled);
    }

    #[test]
    fn test_normal_is_identity_on_limits() {
        let base = CacheProfile::base(DeviceTier::HighEnd);
        let scaled = scale_profile(&base, PressureLevel::Normal);
        assert_eq!(scaled.max_cache_size_bytes, base.max_cache_size_bytes);
        assert_eq!(scaled.max_item_count, base.max_item_count);
        assert_eq!(scaled.ttl, base.ttl);
        assert_eq!(scaled.eviction_threshold, base.eviction_threshold);
        assert!(!scaled.compression_enabled);
        assert_eq!(scaled.name, "high_end/normal");
    }

    #[test]
    fn test_mid_range_emergency() {
        let scaled = scale_profile(&CacheProfile::base(DeviceTier::MidRange), PressureLevel::Emergency);
        assert_eq!(scaled.max_cache_size_bytes, (51.2 * MB as f64).round() as u64);
        assert!((scaled.eviction_threshold - 0.525).abs() < 1e-9);
        assert_eq!(scaled.ttl, Duration::from_secs(9 * 60));
        assert_eq!(scaled.max_item_count, 200);
        assert!(scaled.compression_enabled);
    }

    #[test]
    fn test_size_clamp_scales_items_by_applied_ratio() {
        let scaled = scale_profile(&CacheProfile::base(DeviceTier::LowEnd), PressureLevel::Emergency);
        assert_eq!(scaled.max_cache_size_bytes, 16 * MB);
        assert_eq!(scaled.max_item_count, 50);
    }

    #[test]
    fn test_threshold_clamp() {
        let scaled = scale_profile(&CacheProfile::base(DeviceTier::LowEnd), PressureLevel::Emergency);
        assert_eq!(scaled.eviction_threshold, 0.5);
    }

    #[test]
    fn test_compression_from_warning() {
        let base = CacheProfile::base(DeviceTier::Ultimate);
        assert!(scale_profile(&base, PressureLevel::Warning).compression_enabled);
        assert!(scale_profile(&base, PressureLevel::Critical).compression_enabled);
    }
}
