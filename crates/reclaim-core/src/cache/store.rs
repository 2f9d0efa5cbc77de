//! Pressure-aware weak-reference LRU cache.
//!
//! All mutable state (entry map, recency index, counters, pressure level)
//! sits behind a single mutex so `put`, eviction and the periodic pressure
//! check can never interleave. Operations on one instance apply in call
//! order.

use super::handle::WeakHandle;
use super::pressure::{CacheStrategy, PressureLevel, PressureObservation};
use super::size::EstimateSize;
use super::traits::{
    CacheConfig, CacheEntry, CacheStats, EvictionOutcome, PressureSource, ProfileConsumer,
    PurgeOutcome, PurgeableCache, RepairOutcome, SweepOutcome,
};
use crate::error::Result;
use crate::profile::CacheProfile;
use crate::system::{DeviceSnapshot, NoopReclaimHint, ReclaimHint};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Counters {
    total_accesses: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    reclaimed: u64,
    expired: u64,
    force_reclaim_runs: u64,
    pressure_transitions: u64,
}

#[derive(Debug)]
struct CacheState {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    /// Recency index: ascending tick order, so the first slot is least recent.
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    current_size_bytes: u64,
    level: PressureLevel,
    strategy: CacheStrategy,
    profile_name: Option<String>,
    counters: Counters,
}

impl CacheState {
    fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            current_size_bytes: 0,
            level: PressureLevel::Normal,
            strategy: CacheStrategy::Aggressive,
            profile_name: None,
            counters: Counters::default(),
        }
    }

    fn tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Move `key` to the most-recently-used position.
    fn touch(&mut self, key: &str) {
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.recency);
            entry.recency = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        if self.recency.get(&entry.recency).map(String::as_str) == Some(key) {
            self.recency.remove(&entry.recency);
        }
        self.current_size_bytes = self.current_size_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Evict the least-recently-used entry. Skips slots that no longer
    /// match their entry.
    fn evict_lru(&mut self) -> Option<CacheEntry> {
        while let Some((tick, key)) = self.recency.pop_first() {
            let matches = self
                .entries
                .get(&key)
                .map(|entry| entry.recency == tick)
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let entry = self.remove_entry(&key)?;
            self.counters.evictions += 1;
            debug!("Evicted {} ({} bytes)", key, entry.size_bytes);
            return Some(entry);
        }
        None
    }

    fn evict_to(&mut self, target_bytes: u64) -> EvictionOutcome {
        let mut outcome = EvictionOutcome::default();
        while self.current_size_bytes > target_bytes {
            match self.evict_lru() {
                Some(entry) => {
                    outcome.evicted += 1;
                    outcome.freed_bytes += entry.size_bytes;
                }
                None => break,
            }
        }
        outcome
    }

    /// Make room for an incoming value of `incoming` bytes.
    ///
    /// Once the incoming value would overflow the cache, eviction continues
    /// until it fits under the eviction threshold rather than just under
    /// the hard limit.
    fn ensure_capacity(&mut self, incoming: u64) {
        if self.current_size_bytes.saturating_add(incoming) > self.config.max_cache_size_bytes {
            let target = self.config.eviction_target_bytes();
            while self.current_size_bytes.saturating_add(incoming) > target {
                if self.evict_lru().is_none() {
                    break;
                }
            }
        }
        while self.entries.len() >= self.config.max_item_count.max(1) {
            if self.evict_lru().is_none() {
                break;
            }
        }
    }

    fn sweep<F>(&mut self, mut stale: F) -> (SweepOutcome, Vec<String>)
    where
        F: FnMut(&CacheEntry) -> bool,
    {
        let mut outcome = SweepOutcome {
            scanned: self.entries.len() as u64,
            ..Default::default()
        };
        let keys: Vec<String> = self
            .entries
            .values()
            .filter(|entry| stale(entry))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &keys {
            if let Some(entry) = self.remove_entry(key) {
                outcome.removed += 1;
                outcome.freed_bytes += entry.size_bytes;
            }
        }
        (outcome, keys)
    }

    fn sweep_reclaimed(&mut self) -> SweepOutcome {
        let (outcome, _) = self.sweep(|entry| !entry.handle.is_alive());
        self.counters.reclaimed += outcome.removed;
        outcome
    }
}

/// Bounded key-value cache holding weak handles to values owned elsewhere.
///
/// # Example
///
/// ```
/// use reclaim_core::cache::{CacheConfig, PressureAwareCache};
/// use std::sync::Arc;
///
/// let cache = PressureAwareCache::new("tiles", CacheConfig::with_mb_limit(64));
/// let tile = Arc::new(vec![0u8; 1024]);
///
/// cache.put("page-1", &tile, None);
/// assert!(cache.get::<Vec<u8>>("page-1").is_some());
///
/// // The cache does not keep values alive.
/// drop(tile);
/// assert!(cache.get::<Vec<u8>>("page-1").is_none());
/// ```
pub struct PressureAwareCache {
    name: String,
    state: Mutex<CacheState>,
    reclaim_hint: Arc<dyn ReclaimHint>,
}

impl PressureAwareCache {
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(CacheState::new(config)),
            reclaim_hint: Arc::new(NoopReclaimHint),
        }
    }

    /// Use `hint` for the host reclaim request made by [`force_reclaim`].
    ///
    /// [`force_reclaim`]: PressureAwareCache::force_reclaim
    pub fn with_reclaim_hint(mut self, hint: Arc<dyn ReclaimHint>) -> Self {
        self.reclaim_hint = hint;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cache `value` under `key`, estimating its size when none is given.
    ///
    /// Returns false when the value is larger than the whole cache and was
    /// not stored.
    pub fn put<T>(&self, key: impl Into<String>, value: &Arc<T>, size_bytes: Option<u64>) -> bool
    where
        T: EstimateSize + Any + Send + Sync,
    {
        let size = size_bytes.unwrap_or_else(|| value.estimate_size());
        self.put_sized(key, value, size)
    }

    /// Cache `value` under `key` with an explicit size.
    pub fn put_sized<T>(&self, key: impl Into<String>, value: &Arc<T>, size_bytes: u64) -> bool
    where
        T: Any + Send + Sync,
    {
        let key = key.into();
        let mut state = self.lock();
        state.remove_entry(&key);

        if size_bytes > state.config.max_cache_size_bytes {
            debug!(
                "Not caching {} in {}: {} bytes exceeds capacity {}",
                key, self.name, size_bytes, state.config.max_cache_size_bytes
            );
            return false;
        }

        state.ensure_capacity(size_bytes);

        let now = Instant::now();
        let tick = state.tick();
        state.recency.insert(tick, key.clone());
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                handle: WeakHandle::new(value),
                size_bytes,
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
                recency: tick,
            },
        );
        state.current_size_bytes += size_bytes;
        true
    }

    /// Look up `key`.
    ///
    /// A value reclaimed by its owner, or an expired entry, is purged and
    /// reported as a miss. A value of another type is a miss that keeps the
    /// entry.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let mut state = self.lock();
        state.counters.total_accesses += 1;

        let now = Instant::now();
        let ttl = state.config.ttl;
        let lookup = state
            .entries
            .get(key)
            .map(|entry| (entry.handle.upgrade_any(), entry.is_expired(ttl, now)));
        let Some((live, expired)) = lookup else {
            state.counters.misses += 1;
            return None;
        };

        let Some(live) = live else {
            state.remove_entry(key);
            state.counters.reclaimed += 1;
            state.counters.misses += 1;
            debug!("Purged reclaimed entry {} from {}", key, self.name);
            return None;
        };

        if expired {
            state.remove_entry(key);
            state.counters.expired += 1;
            state.counters.misses += 1;
            return None;
        }

        let value = match live.downcast::<T>() {
            Ok(value) => value,
            Err(_) => {
                state.counters.misses += 1;
                debug!(
                    "Type mismatch for {} in {}: requested {}",
                    key,
                    self.name,
                    std::any::type_name::<T>()
                );
                return None;
            }
        };

        state.touch(key);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_accessed_at = now;
            entry.access_count += 1;
        }
        state.counters.hits += 1;
        Some(value)
    }

    /// Whether `key` has an entry, without touching recency or liveness.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Remove `key`. Removing a missing key is a no-op.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove_entry(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recency.clear();
        state.current_size_bytes = 0;
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        let state = self.lock();
        state
            .recency
            .iter()
            .filter(|(tick, key)| {
                state
                    .entries
                    .get(key.as_str())
                    .map(|entry| entry.recency == **tick)
                    .unwrap_or(false)
            })
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Evict least-recently-used entries until the cache is at or below
    /// `threshold` (defaults to the configured eviction threshold) of its
    /// capacity.
    pub fn perform_lru_eviction(&self, threshold: Option<f64>) -> EvictionOutcome {
        let mut state = self.lock();
        let fraction = threshold
            .unwrap_or(state.config.eviction_threshold)
            .clamp(0.0, 1.0);
        let target = (state.config.max_cache_size_bytes as f64 * fraction) as u64;
        let outcome = state.evict_to(target);
        if outcome.evicted > 0 {
            info!(
                "{}: evicted {} entries ({} bytes) to reach {:.0}% of capacity",
                self.name,
                outcome.evicted,
                outcome.freed_bytes,
                fraction * 100.0
            );
        }
        outcome
    }

    /// Drop entries whose values have been reclaimed.
    pub fn sweep_reclaimed(&self) -> SweepOutcome {
        let outcome = self.lock().sweep_reclaimed();
        if outcome.removed > 0 {
            debug!(
                "{}: swept {} reclaimed entries ({} bytes)",
                self.name, outcome.removed, outcome.freed_bytes
            );
        }
        outcome
    }

    /// Drop entries older than the configured TTL.
    pub fn remove_expired(&self) -> SweepOutcome {
        let mut state = self.lock();
        let ttl = state.config.ttl;
        let now = Instant::now();
        let (outcome, _) = state.sweep(|entry| entry.is_expired(ttl, now));
        state.counters.expired += outcome.removed;
        outcome
    }

    /// Sweep reclaimed entries, then ask the host to release memory.
    ///
    /// Never fails: a failing hint is logged and ignored.
    pub fn force_reclaim(&self) -> SweepOutcome {
        let outcome = {
            let mut state = self.lock();
            state.counters.force_reclaim_runs += 1;
            state.sweep_reclaimed()
        };

        if self.reclaim_hint.is_supported() {
            if let Err(e) = self.reclaim_hint.request_reclaim() {
                warn!(
                    "{}: reclaim hint {} failed: {}",
                    self.name,
                    self.reclaim_hint.name(),
                    e
                );
            }
        }

        info!(
            "{}: forced reclaim removed {} entries ({} bytes)",
            self.name, outcome.removed, outcome.freed_bytes
        );
        outcome
    }

    /// Reconcile the recency index with the entry map and recompute the
    /// size counter.
    pub fn repair_index(&self) -> RepairOutcome {
        let mut state = self.lock();
        let state = &mut *state;
        let mut outcome = RepairOutcome {
            scanned: state.entries.len() as u64,
            ..Default::default()
        };

        let entries = &state.entries;
        let orphaned: Vec<u64> = state
            .recency
            .iter()
            .filter(|(tick, key)| {
                entries
                    .get(key.as_str())
                    .map(|entry| entry.recency != **tick)
                    .unwrap_or(true)
            })
            .map(|(tick, _)| *tick)
            .collect();
        for tick in &orphaned {
            state.recency.remove(tick);
        }
        outcome.orphaned_slots = orphaned.len() as u64;

        let unindexed: Vec<String> = state
            .entries
            .values()
            .filter(|entry| {
                state.recency.get(&entry.recency).map(String::as_str) != Some(entry.key.as_str())
            })
            .map(|entry| entry.key.clone())
            .collect();
        for key in &unindexed {
            let tick = state.next_tick;
            state.next_tick += 1;
            if let Some(entry) = state.entries.get_mut(key) {
                entry.recency = tick;
                state.recency.insert(tick, key.clone());
            }
        }
        outcome.unindexed_entries = unindexed.len() as u64;

        let actual: u64 = state.entries.values().map(|entry| entry.size_bytes).sum();
        outcome.size_drift_bytes = actual.abs_diff(state.current_size_bytes);
        state.current_size_bytes = actual;

        if outcome.repaired() > 0 {
            warn!(
                "{}: repaired cache index ({} orphaned slots, {} unindexed entries, {} bytes drift)",
                self.name, outcome.orphaned_slots, outcome.unindexed_entries, outcome.size_drift_bytes
            );
        }
        outcome
    }

    /// Feed one device snapshot to the pressure classifier.
    ///
    /// Updates level and strategy only when the level changes.
    pub fn observe_snapshot(&self, snapshot: &DeviceSnapshot) -> PressureObservation {
        let usage_percent = snapshot.usage_percent();
        let level = PressureLevel::from_usage_percent(usage_percent);

        let mut state = self.lock();
        let previous = state.level;
        let changed = level != previous;
        if changed {
            state.level = level;
            state.strategy = level.strategy();
            state.counters.pressure_transitions += 1;
        }

        PressureObservation {
            level,
            previous,
            usage_percent,
            changed,
            auto_reclaim: changed
                && usage_percent > state.config.auto_reclaim_threshold * 100.0,
            over_threshold: state.current_size_bytes > state.config.eviction_target_bytes(),
        }
    }

    pub fn pressure_level(&self) -> PressureLevel {
        self.lock().level
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.lock().strategy
    }

    pub fn config(&self) -> CacheConfig {
        self.lock().config.clone()
    }

    pub fn current_size_bytes(&self) -> u64 {
        self.lock().current_size_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            name: self.name.clone(),
            current_size_bytes: state.current_size_bytes,
            max_size_bytes: state.config.max_cache_size_bytes,
            item_count: state.entries.len(),
            alive_count: state
                .entries
                .values()
                .filter(|entry| entry.handle.is_alive())
                .count(),
            max_item_count: state.config.max_item_count,
            total_accesses: state.counters.total_accesses,
            hits: state.counters.hits,
            misses: state.counters.misses,
            eviction_count: state.counters.evictions,
            reclaim_count: state.counters.reclaimed,
            expired_count: state.counters.expired,
            force_reclaim_runs: state.counters.force_reclaim_runs,
            pressure_transitions: state.counters.pressure_transitions,
            pressure_level: state.level,
            strategy: state.strategy,
            eviction_threshold: state.config.eviction_threshold,
            ttl: state.config.ttl,
            compression_enabled: state.config.compression_enabled,
            profile_name: state.profile_name.clone(),
        }
    }
}

impl ProfileConsumer for PressureAwareCache {
    fn consumer_name(&self) -> &str {
        &self.name
    }

    fn apply_profile(&self, profile: &CacheProfile) {
        let mut state = self.lock();
        state.config.max_cache_size_bytes = profile.max_cache_size_bytes;
        state.config.eviction_threshold = profile.eviction_threshold;
        state.config.ttl = profile.ttl;
        state.config.max_item_count = profile.max_item_count;
        state.config.compression_enabled = profile.compression_enabled;
        state.profile_name = Some(profile.name.clone());

        let target = state.config.eviction_target_bytes();
        let mut outcome = state.evict_to(target);
        while state.entries.len() > state.config.max_item_count {
            match state.evict_lru() {
                Some(entry) => {
                    outcome.evicted += 1;
                    outcome.freed_bytes += entry.size_bytes;
                }
                None => break,
            }
        }

        info!(
            "{}: applied profile {} ({} MB, {} items, threshold {:.2}, evicted {})",
            self.name,
            profile.name,
            profile.max_cache_size_bytes / crate::config::MB,
            profile.max_item_count,
            profile.eviction_threshold,
            outcome.evicted
        );
    }
}

impl PressureSource for PressureAwareCache {
    fn pressure_level(&self) -> PressureLevel {
        self.lock().level
    }
}

impl PurgeableCache for PressureAwareCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn purge(&self) -> Result<PurgeOutcome> {
        let mut state = self.lock();
        let outcome = PurgeOutcome {
            items_processed: state.entries.len() as u64,
            items_removed: state.entries.len() as u64,
            freed_bytes: state.current_size_bytes,
        };
        state.entries.clear();
        state.recency.clear();
        state.current_size_bytes = 0;
        Ok(outcome)
    }
}

impl std::fmt::Debug for PressureAwareCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureAwareCache")
            .field("name", &self.name)
            .field("reclaim_hint", &self.reclaim_hint.name())
            .finish_non_exhaustive()
    }
}
