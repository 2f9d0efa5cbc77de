//! Cleanup task trait and the built-in tasks.
//!
//! Cache tasks only go through the cache's public API. The ephemeral purge
//! does its filesystem work on the blocking pool.

use super::types::{CleanupTaskType, TaskOutcome};
use crate::cache::{PressureAwareCache, PurgeableCache, SweepOutcome};
use crate::error::{ReclaimError, Result};
use crate::system::EphemeralStore;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// One independently failable unit of cleanup work.
#[async_trait]
pub trait CleanupTask: Send + Sync {
    fn task_type(&self) -> CleanupTaskType;

    async fn run(&self) -> Result<TaskOutcome>;
}

impl From<SweepOutcome> for TaskOutcome {
    fn from(outcome: SweepOutcome) -> Self {
        Self {
            items_processed: outcome.scanned,
            items_removed: outcome.removed,
            memory_freed_bytes: outcome.freed_bytes,
        }
    }
}

pub struct WeakRefSweepTask {
    cache: Arc<PressureAwareCache>,
}

impl WeakRefSweepTask {
    pub fn new(cache: Arc<PressureAwareCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl CleanupTask for WeakRefSweepTask {
    fn task_type(&self) -> CleanupTaskType {
        CleanupTaskType::WeakRefSweep
    }

    async fn run(&self) -> Result<TaskOutcome> {
        Ok(self.cache.sweep_reclaimed().into())
    }
}

pub struct ExpiredEntrySweepTask {
    cache: Arc<PressureAwareCache>,
}

impl ExpiredEntrySweepTask {
    pub fn new(cache: Arc<PressureAwareCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl CleanupTask for ExpiredEntrySweepTask {
    fn task_type(&self) -> CleanupTaskType {
        CleanupTaskType::ExpiredEntrySweep
    }

    async fn run(&self) -> Result<TaskOutcome> {
        Ok(self.cache.remove_expired().into())
    }
}

/// Leak detection: reconcile the recency index with the entry map.
pub struct LeakRepairTask {
    cache: Arc<PressureAwareCache>,
}

impl LeakRepairTask {
    pub fn new(cache: Arc<PressureAwareCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl CleanupTask for LeakRepairTask {
    fn task_type(&self) -> CleanupTaskType {
        CleanupTaskType::LeakRepair
    }

    async fn run(&self) -> Result<TaskOutcome> {
        let outcome = self.cache.repair_index();
        Ok(TaskOutcome {
            items_processed: outcome.scanned,
            items_removed: outcome.orphaned_slots,
            memory_freed_bytes: 0,
        })
    }
}

pub struct ForcedReclaimTask {
    cache: Arc<PressureAwareCache>,
}

impl ForcedReclaimTask {
    pub fn new(cache: Arc<PressureAwareCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl CleanupTask for ForcedReclaimTask {
    fn task_type(&self) -> CleanupTaskType {
        CleanupTaskType::ForcedReclaim
    }

    async fn run(&self) -> Result<TaskOutcome> {
        Ok(self.cache.force_reclaim().into())
    }
}

/// Purges an image or network cache. With no cache attached it succeeds
/// without doing anything.
pub struct CachePurgeTask {
    task_type: CleanupTaskType,
    cache: Option<Arc<dyn PurgeableCache>>,
}

impl CachePurgeTask {
    pub fn image(cache: Option<Arc<dyn PurgeableCache>>) -> Self {
        Self {
            task_type: CleanupTaskType::ImageCachePurge,
            cache,
        }
    }

    pub fn network(cache: Option<Arc<dyn PurgeableCache>>) -> Self {
        Self {
            task_type: CleanupTaskType::NetworkCachePurge,
            cache,
        }
    }
}

#[async_trait]
impl CleanupTask for CachePurgeTask {
    fn task_type(&self) -> CleanupTaskType {
        self.task_type
    }

    async fn run(&self) -> Result<TaskOutcome> {
        let Some(cache) = &self.cache else {
            debug!("{}: no cache attached", self.task_type);
            return Ok(TaskOutcome::default());
        };
        let outcome = cache.purge()?;
        debug!(
            "{}: purged {} ({} items, {} bytes)",
            self.task_type,
            cache.name(),
            outcome.items_removed,
            outcome.freed_bytes
        );
        Ok(TaskOutcome {
            items_processed: outcome.items_processed,
            items_removed: outcome.items_removed,
            memory_freed_bytes: outcome.freed_bytes,
        })
    }
}

/// Deletes entries in the ephemeral directory older than a TTL.
pub struct EphemeralFilePurgeTask {
    store: Arc<dyn EphemeralStore>,
    dir: PathBuf,
    ttl: Duration,
}

impl EphemeralFilePurgeTask {
    pub fn new(store: Arc<dyn EphemeralStore>, dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            store,
            dir: dir.into(),
            ttl,
        }
    }

    fn purge_blocking(store: &dyn EphemeralStore, dir: &Path, ttl: Duration) -> Result<TaskOutcome> {
        let listing = store.list_entries(dir)?;
        let now = SystemTime::now();
        let mut outcome = TaskOutcome {
            items_processed: listing.unreadable,
            ..Default::default()
        };
        if listing.unreadable > 0 {
            warn!("{} unreadable ephemeral entries in {}", listing.unreadable, dir.display());
        }

        for entry in listing.entries {
            let Some(modified_at) = entry.modified_at else {
                outcome.items_processed += 1;
                warn!("Skipping ephemeral entry {} with unknown age", entry.path.display());
                continue;
            };
            // Timestamps in the future count as fresh.
            let age = now.duration_since(modified_at).unwrap_or_default();
            if age <= ttl {
                continue;
            }

            outcome.items_processed += 1;
            if store.delete(&entry.path) {
                outcome.items_removed += 1;
                outcome.memory_freed_bytes += entry.size_bytes;
            } else {
                warn!("Could not delete ephemeral entry {}", entry.path.display());
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl CleanupTask for EphemeralFilePurgeTask {
    fn task_type(&self) -> CleanupTaskType {
        CleanupTaskType::EphemeralFilePurge
    }

    async fn run(&self) -> Result<TaskOutcome> {
        let store = Arc::clone(&self.store);
        let dir = self.dir.clone();
        let ttl = self.ttl;
        tokio::task::spawn_blocking(move || {
            EphemeralFilePurgeTask::purge_blocking(store.as_ref(), &dir, ttl)
        })
        .await
        .map_err(|e| {
            ReclaimError::task_failed(CleanupTaskType::EphemeralFilePurge.as_str(), e.to_string())
        })?
    }
}

/// Task backed by a closure. Lets a host replace a built-in task.
pub struct FnTask {
    task_type: CleanupTaskType,
    run: Box<dyn Fn() -> BoxFuture<'static, Result<TaskOutcome>> + Send + Sync>,
}

impl FnTask {
    pub fn new<F, Fut>(task_type: CleanupTaskType, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutcome>> + Send + 'static,
    {
        Self {
            task_type,
            run: Box::new(move || -> BoxFuture<'static, Result<TaskOutcome>> { Box::pin(run()) }),
        }
    }
}

#[async_trait]
impl CleanupTask for FnTask {
    fn task_type(&self) -> CleanupTaskType {
        self.task_type
    }

    async fn run(&self) -> Result<TaskOutcome> {
        (self.run)().await
    }
}

/// Collaborators the built-in tasks operate on.
pub struct BuiltinTaskContext {
    pub cache: Arc<PressureAwareCache>,
    pub image_cache: Option<Arc<dyn PurgeableCache>>,
    pub network_cache: Option<Arc<dyn PurgeableCache>>,
    pub ephemeral_store: Arc<dyn EphemeralStore>,
    pub ephemeral_dir: PathBuf,
    pub ephemeral_file_ttl: Duration,
}

/// One task per [`CleanupTaskType`].
pub fn builtin_tasks(context: BuiltinTaskContext) -> Vec<Arc<dyn CleanupTask>> {
    let BuiltinTaskContext {
        cache,
        image_cache,
        network_cache,
        ephemeral_store,
        ephemeral_dir,
        ephemeral_file_ttl,
    } = context;

    vec![
        Arc::new(WeakRefSweepTask::new(Arc::clone(&cache))),
        Arc::new(ExpiredEntrySweepTask::new(Arc::clone(&cache))),
        Arc::new(LeakRepairTask::new(Arc::clone(&cache))),
        Arc::new(ForcedReclaimTask::new(cache)),
        Arc::new(CachePurgeTask::image(image_cache)),
        Arc::new(CachePurgeTask::network(network_cache)),
        Arc::new(EphemeralFilePurgeTask::new(
            ephemeral_store,
            ephemeral_dir,
            ephemeral_file_ttl,
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::config::MB;
    use crate::system::{EphemeralEntry, EphemeralListing, FsEphemeralStore};
    use std::sync::Mutex;

    fn cache() -> Arc<PressureAwareCache> {
        Arc::new(PressureAwareCache::new("primary", CacheConfig::with_mb_limit(64)))
    }

    #[tokio::test]
    async fn test_weak_ref_sweep_task() {
        let cache = cache();
        let live = Arc::new(String::from("live"));
        let dead = Arc::new(String::from("dead"));
        cache.put("live", &live, Some(MB));
        cache.put("dead", &dead, Some(2 * MB));
        drop(dead);

        let outcome = WeakRefSweepTask::new(Arc::clone(&cache)).run().await.unwrap();
        assert_eq!(outcome.items_processed, 2);
        assert_eq!(outcome.items_removed, 1);
        assert_eq!(outcome.memory_freed_bytes, 2 * MB);
        assert!(cache.contains("live"));
    }

    #[tokio::test]
    async fn test_cache_purge_without_cache() {
        let outcome = CachePurgeTask::network(None).run().await.unwrap();
        assert_eq!(outcome, TaskOutcome::default());
    }

    #[tokio::test]
    async fn test_image_purge_empties_cache() {
        let images = cache();
        let value = Arc::new(vec![0u8; 4]);
        images.put("a", &value, Some(MB));

        let task = CachePurgeTask::image(Some(images.clone() as Arc<dyn PurgeableCache>));
        let outcome = task.run().await.unwrap();
        assert_eq!(task.task_type(), CleanupTaskType::ImageCachePurge);
        assert_eq!(outcome.items_removed, 1);
        assert!(images.is_empty());
    }

    #[tokio::test]
    async fn test_ephemeral_purge_deletes_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.tmp");
        let fresh = dir.path().join("fresh.tmp");
        std::fs::write(&old, b"0123456789").unwrap();
        std::fs::write(&fresh, b"x").unwrap();

        let three_hours_ago = SystemTime::now() - Duration::from_secs(3 * 60 * 60);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(three_hours_ago)
            .unwrap();

        let task = EphemeralFilePurgeTask::new(
            Arc::new(FsEphemeralStore),
            dir.path(),
            Duration::from_secs(2 * 60 * 60),
        );
        let outcome = task.run().await.unwrap();

        assert_eq!(outcome.items_processed, 1);
        assert_eq!(outcome.items_removed, 1);
        assert_eq!(outcome.memory_freed_bytes, 10);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    /// Store whose deletions fail for selected paths.
    struct FlakyStore {
        listing: EphemeralListing,
        undeletable: PathBuf,
        deleted: Mutex<Vec<PathBuf>>,
    }

    impl EphemeralStore for FlakyStore {
        fn list_entries(&self, _dir: &Path) -> Result<EphemeralListing> {
            Ok(self.listing.clone())
        }

        fn delete(&self, path: &Path) -> bool {
            if path == self.undeletable {
                return false;
            }
            self.deleted.lock().unwrap().push(path.to_path_buf());
            true
        }
    }

    #[tokio::test]
    async fn test_ephemeral_purge_skips_failed_deletes() {
        let old = SystemTime::now() - Duration::from_secs(10_000);
        let entry = |name: &str| EphemeralEntry {
            path: PathBuf::from(name),
            modified_at: Some(old),
            size_bytes: 100,
        };
        let store = Arc::new(FlakyStore {
            listing: EphemeralListing {
                entries: vec![entry("a"), entry("b"), entry("c")],
                unreadable: 0,
            },
            undeletable: PathBuf::from("b"),
            deleted: Mutex::new(Vec::new()),
        });

        let task = EphemeralFilePurgeTask::new(store.clone(), "/unused", Duration::from_secs(60));
        let outcome = task.run().await.unwrap();

        assert_eq!(outcome.items_processed, 3);
        assert_eq!(outcome.items_removed, 2);
        assert_eq!(outcome.memory_freed_bytes, 200);
        assert_eq!(store.deleted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ephemeral_purge_keeps_entries_of_unknown_age() {
        let old = SystemTime::now() - Duration::from_secs(10_000);
        let store = Arc::new(FlakyStore {
            listing: EphemeralListing {
                entries: vec![
                    EphemeralEntry {
                        path: PathBuf::from("stale"),
                        modified_at: Some(old),
                        size_bytes: 100,
                    },
                    EphemeralEntry {
                        path: PathBuf::from("no-mtime"),
                        modified_at: None,
                        size_bytes: 0,
                    },
                ],
                unreadable: 2,
            },
            undeletable: PathBuf::new(),
            deleted: Mutex::new(Vec::new()),
        });

        let task = EphemeralFilePurgeTask::new(store.clone(), "/unused", Duration::from_secs(60));
        let outcome = task.run().await.unwrap();

        assert_eq!(outcome.items_processed, 4);
        assert_eq!(outcome.items_removed, 1);
        assert_eq!(outcome.memory_freed_bytes, 100);
        assert_eq!(*store.deleted.lock().unwrap(), vec![PathBuf::from("stale")]);
    }

    #[tokio::test]
    async fn test_fn_task() {
        let task = FnTask::new(CleanupTaskType::LeakRepair, || async {
            Err(ReclaimError::Other("nope".into()))
        });
        assert_eq!(task.task_type(), CleanupTaskType::LeakRepair);
        assert!(task.run().await.is_err());
    }

    #[test]
    fn test_builtin_tasks_cover_every_type() {
        let tasks = builtin_tasks(BuiltinTaskContext {
            cache: cache(),
            image_cache: None,
            network_cache: None,
            ephemeral_store: Arc::new(FsEphemeralStore),
            ephemeral_dir: std::env::temp_dir(),
            ephemeral_file_ttl: Duration::from_secs(60),
        });
        let mut types: Vec<_> = tasks.iter().map(|t| t.task_type()).collect();
        types.sort();
        assert_eq!(types, CleanupTaskType::ALL.to_vec());
    }
}
