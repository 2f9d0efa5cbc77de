//! Integration tests for the assembled runtime.

use reclaim_core::cache::{CacheConfig, PurgeableCache};
use reclaim_core::config::MB;
use reclaim_core::system::NoopReclaimHint;
use reclaim_core::{
    CleanupLevel, PressureAwareCache, PressureLevel, ReclaimConfig, ReclaimEvent, ReclaimRuntime,
    StaticProbe,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

struct TestEnv {
    _dir: TempDir,
    ephemeral_dir: std::path::PathBuf,
    probe: Arc<StaticProbe>,
    images: Arc<PressureAwareCache>,
    runtime: ReclaimRuntime,
}

fn create_test_env() -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let ephemeral_dir = dir.path().join("ephemeral");
    std::fs::create_dir_all(&ephemeral_dir).unwrap();

    let config = ReclaimConfig {
        ephemeral_dir: Some(ephemeral_dir.clone()),
        cleanup_batch_delay_ms: 0,
        ..Default::default()
    };
    let probe = Arc::new(StaticProbe::with_usage(50, 8192 * MB, 40.0));
    let images = Arc::new(PressureAwareCache::new("images", CacheConfig::with_mb_limit(32)));

    let runtime = ReclaimRuntime::builder(config)
        .with_probe(probe.clone())
        .with_reclaim_hint(Arc::new(NoopReclaimHint))
        .with_image_cache(images.clone() as Arc<dyn PurgeableCache>)
        .build()
        .unwrap();

    TestEnv {
        _dir: dir,
        ephemeral_dir,
        probe,
        images,
        runtime,
    }
}

#[tokio::test]
async fn test_deep_cleanup_touches_every_collaborator() {
    let env = create_test_env();

    let stale = env.ephemeral_dir.join("stale.bin");
    std::fs::write(&stale, vec![0u8; 128]).unwrap();
    std::fs::File::options()
        .write(true)
        .open(&stale)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(3 * 60 * 60))
        .unwrap();
    let fresh = env.ephemeral_dir.join("fresh.bin");
    std::fs::write(&fresh, b"fresh").unwrap();

    let image = Arc::new(vec![0u8; 8]);
    env.images.put("img", &image, Some(MB));

    let dead = Arc::new(String::from("gone"));
    env.runtime.cache().put("dead", &dead, Some(MB));
    drop(dead);

    let summary = env.runtime.orchestrator().run_level(CleanupLevel::Deep).await;

    assert_eq!(summary.tasks_run, 7);
    assert_eq!(summary.failed, 0);
    assert!(!stale.exists());
    assert!(fresh.exists());
    assert!(env.images.is_empty());
    assert!(!env.runtime.cache().contains("dead"));
}

#[tokio::test]
async fn test_emergency_pressure_triggers_aggressive_cleanup() {
    let env = create_test_env();
    let mut events = env.runtime.subscribe();
    env.runtime.start();

    env.probe.set_usage_percent(92.0);
    env.runtime.monitor().check_pressure();
    assert_eq!(env.runtime.cache().pressure_level(), PressureLevel::Emergency);

    let summary = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ReclaimEvent::CleanupCompleted(summary)) = events.recv().await {
                return summary;
            }
        }
    })
    .await
    .expect("aggressive cleanup did not run");

    assert_eq!(summary.level, CleanupLevel::Aggressive);
    assert_eq!(summary.tasks_run, 7);

    env.runtime.shutdown();
    assert!(!env.runtime.is_running());
}

#[tokio::test]
async fn test_emergency_at_startup_triggers_aggressive_cleanup() {
    let env = create_test_env();
    env.probe.set_usage_percent(92.0);
    let mut events = env.runtime.subscribe();

    env.runtime.start();

    let summary = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ReclaimEvent::CleanupCompleted(summary)) = events.recv().await {
                return summary;
            }
        }
    })
    .await
    .expect("aggressive cleanup did not run");
    assert_eq!(summary.level, CleanupLevel::Aggressive);

    env.runtime.shutdown();
}

#[tokio::test]
async fn test_pressure_rescales_primary_cache() {
    let env = create_test_env();
    env.runtime.start();
    let normal = env.runtime.cache().config().max_cache_size_bytes;

    env.probe.set_usage_percent(80.0);
    env.runtime.monitor().check_pressure();
    let profile = env.runtime.adjuster().trigger_adjustment().unwrap();

    assert_eq!(profile.name, "mid_range/critical");
    assert!(env.runtime.cache().config().max_cache_size_bytes < normal);
    env.runtime.shutdown();
}
