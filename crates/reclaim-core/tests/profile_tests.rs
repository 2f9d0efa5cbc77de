//! Integration tests for profile scaling and adjustment.

use reclaim_core::cache::{CacheConfig, PressureAwareCache, PressureLevel};
use reclaim_core::config::MB;
use reclaim_core::profile::{AdjustmentReason, ProfileAdjuster};
use reclaim_core::{scale_profile, CacheProfile, DeviceTier, EventBus, ReclaimEvent, StaticProbe};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_mid_range_emergency_profile() {
    let base = CacheProfile::base(DeviceTier::MidRange);
    let profile = scale_profile(&base, PressureLevel::Emergency);

    assert!((profile.max_cache_size_mb() - 51.2).abs() < 1e-6);
    assert!((profile.eviction_threshold - 0.525).abs() < 1e-9);
    assert_eq!(profile.ttl, Duration::from_secs(9 * 60));
    assert_eq!(profile.max_item_count, 200);
}

#[test]
fn test_clamps_hold_for_every_tier_and_level() {
    let tiers = [
        DeviceTier::LowEnd,
        DeviceTier::MidRange,
        DeviceTier::HighEnd,
        DeviceTier::Ultimate,
    ];
    let levels = [
        PressureLevel::Normal,
        PressureLevel::Warning,
        PressureLevel::Critical,
        PressureLevel::Emergency,
    ];

    for tier in tiers {
        let base = CacheProfile::base(tier);
        for level in levels {
            let profile = scale_profile(&base, level);
            assert!(profile.max_cache_size_bytes >= 16 * MB);
            assert!(profile.eviction_threshold >= 0.5);
            assert!(profile.max_cache_size_bytes <= base.max_cache_size_bytes);
            assert_eq!(
                profile.compression_enabled,
                base.compression_enabled || level >= PressureLevel::Warning
            );
        }
    }
}

#[test]
fn test_adjuster_shrinks_registered_cache_under_pressure() {
    let probe = Arc::new(StaticProbe::with_usage(45, 8192 * MB, 30.0));
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let adjuster = ProfileAdjuster::new(probe.clone(), events, Duration::from_secs(30), 0.2);

    let cache = Arc::new(PressureAwareCache::new("primary", CacheConfig::default()));
    adjuster.register_consumer("primary", DeviceTier::MidRange, cache.clone());
    assert_eq!(cache.config().max_cache_size_bytes, 128 * MB);

    let value = Arc::new(vec![0u8; 8]);
    for i in 0..6 {
        cache.put(format!("k{i}"), &value, Some(15 * MB));
    }

    adjuster.trigger_adjustment();
    probe.set_usage_percent(90.0);
    let profile = adjuster.trigger_adjustment().unwrap();

    let config = cache.config();
    assert_eq!(config.max_cache_size_bytes, profile.max_cache_size_bytes);
    assert!(cache.current_size_bytes() <= config.eviction_target_bytes());

    let reasons: Vec<_> = std::iter::from_fn(|| match rx.try_recv() {
        Ok(ReclaimEvent::ProfileAdjusted(event)) => Some(event.reason),
        _ => None,
    })
    .collect();
    assert_eq!(
        reasons,
        vec![AdjustmentReason::FirstRun, AdjustmentReason::PressureChanged]
    );
}
