//! Builder for configuring ReclaimRuntime initialization.

use std::sync::Arc;

use crate::cache::{CacheConfig, PressureAwareCache, PressureMonitor, PurgeableCache};
use crate::cleanup::{builtin_tasks, BuiltinTaskContext, CleanupOrchestrator};
use crate::config::ReclaimConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::profile::{DeviceTier, ProfileAdjuster};
use crate::runtime::{ReclaimRuntime, PRIMARY_CACHE_NAME};
use crate::system::{
    default_reclaim_hint, DeviceProbe, EphemeralStore, FsEphemeralStore, ReclaimHint,
    SysinfoProbe,
};

/// Builder for configuring ReclaimRuntime initialization.
///
/// Every collaborator has a default: the `sysinfo` probe, the platform
/// reclaim hint, and the local filesystem for ephemeral files.
///
/// # Example
///
/// ```rust,no_run
/// use reclaim_core::{ReclaimConfig, ReclaimRuntime};
///
/// # async fn run() -> reclaim_core::Result<()> {
/// let runtime = ReclaimRuntime::builder(ReclaimConfig::default()).build()?;
/// runtime.start();
/// // ...
/// runtime.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct ReclaimRuntimeBuilder {
    config: ReclaimConfig,
    probe: Option<Arc<dyn DeviceProbe>>,
    reclaim_hint: Option<Arc<dyn ReclaimHint>>,
    ephemeral_store: Option<Arc<dyn EphemeralStore>>,
    image_cache: Option<Arc<dyn PurgeableCache>>,
    network_cache: Option<Arc<dyn PurgeableCache>>,
    events: Option<EventBus>,
}

impl ReclaimRuntimeBuilder {
    pub fn new(config: ReclaimConfig) -> Self {
        Self {
            config,
            probe: None,
            reclaim_hint: None,
            ephemeral_store: None,
            image_cache: None,
            network_cache: None,
            events: None,
        }
    }

    /// Device and memory probe.
    ///
    /// Default: [`SysinfoProbe`]
    pub fn with_probe(mut self, probe: Arc<dyn DeviceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Allocator hint used by forced reclaims.
    ///
    /// Default: [`default_reclaim_hint`]
    pub fn with_reclaim_hint(mut self, hint: Arc<dyn ReclaimHint>) -> Self {
        self.reclaim_hint = Some(hint);
        self
    }

    /// Storage swept by the ephemeral-file purge.
    ///
    /// Default: [`FsEphemeralStore`]
    pub fn with_ephemeral_store(mut self, store: Arc<dyn EphemeralStore>) -> Self {
        self.ephemeral_store = Some(store);
        self
    }

    /// Cache emptied by the image-cache purge task.
    pub fn with_image_cache(mut self, cache: Arc<dyn PurgeableCache>) -> Self {
        self.image_cache = Some(cache);
        self
    }

    /// Cache emptied by the network-cache purge task.
    pub fn with_network_cache(mut self, cache: Arc<dyn PurgeableCache>) -> Self {
        self.network_cache = Some(cache);
        self
    }

    /// Share an existing event bus instead of creating one.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the runtime. Nothing is started until [`ReclaimRuntime::start`].
    pub fn build(self) -> Result<ReclaimRuntime> {
        let config = self.config;
        config.validate()?;

        let events = self.events.unwrap_or_default();
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SysinfoProbe::new()));
        let reclaim_hint = self.reclaim_hint.unwrap_or_else(default_reclaim_hint);
        let ephemeral_store = self
            .ephemeral_store
            .unwrap_or_else(|| Arc::new(FsEphemeralStore));

        let cache = Arc::new(
            PressureAwareCache::new(PRIMARY_CACHE_NAME, CacheConfig::from(&config))
                .with_reclaim_hint(reclaim_hint),
        );

        let monitor = Arc::new(PressureMonitor::new(
            Arc::clone(&cache),
            Arc::clone(&probe),
            events.clone(),
            config.pressure_check_interval(),
            config.weak_ref_cleanup_interval(),
        ));

        let adjuster = Arc::new(
            ProfileAdjuster::new(
                Arc::clone(&probe),
                events.clone(),
                config.adjustment_interval(),
                config.available_memory_change_threshold,
            )
            .with_pressure_source(cache.clone()),
        );

        if config.adaptive_profiles {
            let tier = match probe.snapshot() {
                Ok(snapshot) => DeviceTier::from_score(snapshot.performance_score),
                Err(e) => {
                    tracing::warn!("Device probe failed during setup, assuming mid-range: {}", e);
                    DeviceTier::MidRange
                }
            };
            adjuster.register_consumer(PRIMARY_CACHE_NAME, tier, cache.clone());
        }

        let orchestrator = Arc::new(CleanupOrchestrator::new(
            events.clone(),
            config.max_parallel_cleanup_tasks,
            config.cleanup_batch_delay(),
        ));
        orchestrator.register_tasks(builtin_tasks(BuiltinTaskContext {
            cache: Arc::clone(&cache),
            image_cache: self.image_cache,
            network_cache: self.network_cache,
            ephemeral_store,
            ephemeral_dir: config.ephemeral_dir(),
            ephemeral_file_ttl: config.ephemeral_file_ttl(),
        }));

        tracing::info!(
            "Reclaim runtime built (cache {} MB, {} cleanup schedules, adaptive profiles {})",
            config.max_cache_size_mb,
            config.cleanup_level_schedules.len(),
            config.adaptive_profiles
        );

        Ok(ReclaimRuntime::from_parts(
            config,
            events,
            cache,
            monitor,
            adjuster,
            orchestrator,
        ))
    }
}
