//! The assembled subsystem: one cache, its pressure monitor, the profile
//! adjuster and the cleanup orchestrator, wired together explicitly.

mod builder;

pub use builder::ReclaimRuntimeBuilder;

use crate::cache::{PressureAwareCache, PressureMonitor};
use crate::cleanup::CleanupOrchestrator;
use crate::config::ReclaimConfig;
use crate::events::{EventBus, ReclaimEvent};
use crate::profile::ProfileAdjuster;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Consumer name of the runtime's own cache.
pub const PRIMARY_CACHE_NAME: &str = "primary";

/// Handle to the running subsystem.
///
/// `start` and `shutdown` must be called from within a tokio runtime.
pub struct ReclaimRuntime {
    config: ReclaimConfig,
    events: EventBus,
    cache: Arc<PressureAwareCache>,
    monitor: Arc<PressureMonitor>,
    adjuster: Arc<ProfileAdjuster>,
    orchestrator: Arc<CleanupOrchestrator>,
    running: AtomicBool,
}

impl ReclaimRuntime {
    pub fn builder(config: ReclaimConfig) -> ReclaimRuntimeBuilder {
        ReclaimRuntimeBuilder::new(config)
    }

    pub(crate) fn from_parts(
        config: ReclaimConfig,
        events: EventBus,
        cache: Arc<PressureAwareCache>,
        monitor: Arc<PressureMonitor>,
        adjuster: Arc<ProfileAdjuster>,
        orchestrator: Arc<CleanupOrchestrator>,
    ) -> Self {
        Self {
            config,
            events,
            cache,
            monitor,
            adjuster,
            orchestrator,
            running: AtomicBool::new(false),
        }
    }

    /// Subscribe the emergency listener, take an initial reading, then start
    /// every timer. Calling it again while running does nothing.
    ///
    /// The listener subscribes first so a host already at emergency pressure
    /// gets an aggressive cleanup from the initial reading.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.orchestrator.listen_for_emergency();
        self.orchestrator.start(&self.config.cleanup_schedules());

        self.monitor.check_pressure();
        if self.config.adaptive_profiles {
            self.adjuster.trigger_adjustment();
            self.adjuster.start();
        }
        self.monitor.start();

        info!("Reclaim runtime started");
    }

    /// Stop every timer. Cleanup runs in flight finish their current batch.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.monitor.stop();
        self.adjuster.stop();
        self.orchestrator.stop();
        info!("Reclaim runtime stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReclaimEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &ReclaimConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PressureAwareCache> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<PressureMonitor> {
        &self.monitor
    }

    pub fn adjuster(&self) -> &Arc<ProfileAdjuster> {
        &self.adjuster
    }

    pub fn orchestrator(&self) -> &Arc<CleanupOrchestrator> {
        &self.orchestrator
    }
}

impl Drop for ReclaimRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PressureLevel;
    use crate::cleanup::CleanupTaskType;
    use crate::config::MB;
    use crate::system::{NoopReclaimHint, StaticProbe};
    use std::time::Duration;

    fn runtime(config: ReclaimConfig, probe: Arc<StaticProbe>) -> ReclaimRuntime {
        ReclaimRuntime::builder(config)
            .with_probe(probe)
            .with_reclaim_hint(Arc::new(NoopReclaimHint))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = ReclaimConfig {
            max_parallel_cleanup_tasks: 0,
            ..Default::default()
        };
        assert!(ReclaimRuntime::builder(config).build().is_err());
    }

    #[test]
    fn test_build_registers_primary_at_probe_tier() {
        let probe = Arc::new(StaticProbe::with_usage(65, 16384 * MB, 30.0));
        let runtime = runtime(ReclaimConfig::default(), probe);

        let consumers = runtime.adjuster().consumers();
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].0, PRIMARY_CACHE_NAME);
        assert_eq!(runtime.cache().config().max_cache_size_bytes, 512 * MB);
        assert_eq!(runtime.orchestrator().registered_tasks(), CleanupTaskType::ALL.to_vec());
    }

    #[test]
    fn test_static_limits_without_adaptive_profiles() {
        let probe = Arc::new(StaticProbe::with_usage(65, 16384 * MB, 30.0));
        let config = ReclaimConfig {
            adaptive_profiles: false,
            ..Default::default()
        };
        let runtime = runtime(config, probe);

        assert!(runtime.adjuster().consumers().is_empty());
        assert_eq!(runtime.cache().config().max_cache_size_bytes, 64 * MB);
    }

    #[test]
    fn test_adaptive_profile_replaces_configured_limits() {
        let probe = Arc::new(StaticProbe::with_usage(50, 8192 * MB, 30.0));
        let config = ReclaimConfig {
            max_cache_size_mb: 256,
            max_item_count: 10,
            lru_eviction_threshold: 0.5,
            ..Default::default()
        };
        let runtime = runtime(config, probe);

        let cache = runtime.cache().config();
        assert_eq!(cache.max_cache_size_bytes, 128 * MB);
        assert_eq!(cache.max_item_count, 500);
        assert_eq!(cache.eviction_threshold, 0.75);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let probe = Arc::new(StaticProbe::with_usage(50, 8192 * MB, 40.0));
        let runtime = runtime(ReclaimConfig::default(), probe.clone());

        runtime.start();
        assert!(runtime.is_running());
        assert!(runtime.monitor().is_running());
        assert!(runtime.orchestrator().is_running());
        assert_eq!(runtime.adjuster().stats().adjustments_applied, 1);

        probe.set_usage_percent(80.0);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runtime.cache().pressure_level(), PressureLevel::Critical);

        runtime.shutdown();
        assert!(!runtime.is_running());
        assert!(!runtime.adjuster().is_running());
    }

    #[tokio::test]
    async fn test_emergency_at_startup_runs_aggressive_cleanup() {
        let probe = Arc::new(StaticProbe::with_usage(50, 8192 * MB, 92.0));
        let config = ReclaimConfig {
            ephemeral_dir: Some(std::env::temp_dir().join("reclaim-startup-test")),
            cleanup_batch_delay_ms: 0,
            ..Default::default()
        };
        let runtime = runtime(config, probe);
        let mut events = runtime.subscribe();

        runtime.start();
        assert_eq!(runtime.cache().pressure_level(), PressureLevel::Emergency);

        let level = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(ReclaimEvent::CleanupCompleted(summary)) = events.recv().await {
                    return summary.level;
                }
            }
        })
        .await
        .expect("no cleanup ran after an emergency start");
        assert_eq!(level, crate::cleanup::CleanupLevel::Aggressive);

        runtime.shutdown();
    }

    #[test]
    fn test_adjuster_follows_cache_pressure_level() {
        let probe = Arc::new(StaticProbe::with_usage(50, 8192 * MB, 40.0));
        let runtime = runtime(ReclaimConfig::default(), probe.clone());
        runtime.adjuster().trigger_adjustment();

        // Until the monitor reclassifies, the adjuster keeps the cache's level.
        probe.set_usage_percent(80.0);
        runtime.adjuster().force_adjustment().unwrap();
        assert_eq!(
            runtime.adjuster().stats().current_level,
            Some(PressureLevel::Normal)
        );

        runtime.monitor().check_pressure();
        let profile = runtime.adjuster().trigger_adjustment().unwrap();
        assert_eq!(profile.name, "mid_range/critical");
    }
}
