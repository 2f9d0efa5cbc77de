//! Cleanup task types, levels and results.

use crate::error::ReclaimError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// A unit of cleanup work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupTaskType {
    /// Drop cache entries whose values were reclaimed.
    WeakRefSweep,
    /// Drop cache entries past their TTL.
    ExpiredEntrySweep,
    /// Reconcile the cache's recency index and size accounting.
    LeakRepair,
    /// Sweep and hint the host allocator to release memory.
    ForcedReclaim,
    ImageCachePurge,
    NetworkCachePurge,
    /// Delete old files from the ephemeral directory.
    EphemeralFilePurge,
}

impl CleanupTaskType {
    pub const ALL: [CleanupTaskType; 7] = [
        CleanupTaskType::WeakRefSweep,
        CleanupTaskType::ExpiredEntrySweep,
        CleanupTaskType::LeakRepair,
        CleanupTaskType::ForcedReclaim,
        CleanupTaskType::ImageCachePurge,
        CleanupTaskType::NetworkCachePurge,
        CleanupTaskType::EphemeralFilePurge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupTaskType::WeakRefSweep => "weak_ref_sweep",
            CleanupTaskType::ExpiredEntrySweep => "expired_entry_sweep",
            CleanupTaskType::LeakRepair => "leak_repair",
            CleanupTaskType::ForcedReclaim => "forced_reclaim",
            CleanupTaskType::ImageCachePurge => "image_cache_purge",
            CleanupTaskType::NetworkCachePurge => "network_cache_purge",
            CleanupTaskType::EphemeralFilePurge => "ephemeral_file_purge",
        }
    }
}

impl std::fmt::Display for CleanupTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named set of cleanup tasks, lightest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupLevel {
    Minimal,
    Quick,
    Routine,
    Full,
    Aggressive,
    Deep,
}

impl CleanupLevel {
    pub const ALL: [CleanupLevel; 6] = [
        CleanupLevel::Minimal,
        CleanupLevel::Quick,
        CleanupLevel::Routine,
        CleanupLevel::Full,
        CleanupLevel::Aggressive,
        CleanupLevel::Deep,
    ];

    /// Tasks run at this level, in execution order.
    pub fn tasks(&self) -> &'static [CleanupTaskType] {
        use CleanupTaskType::*;
        match self {
            CleanupLevel::Minimal => &[ExpiredEntrySweep],
            CleanupLevel::Quick => &[WeakRefSweep, ExpiredEntrySweep],
            CleanupLevel::Routine => &[ExpiredEntrySweep, EphemeralFilePurge],
            CleanupLevel::Full => &[WeakRefSweep, ExpiredEntrySweep, LeakRepair, ForcedReclaim],
            CleanupLevel::Aggressive | CleanupLevel::Deep => &CleanupTaskType::ALL,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupLevel::Minimal => "minimal",
            CleanupLevel::Quick => "quick",
            CleanupLevel::Routine => "routine",
            CleanupLevel::Full => "full",
            CleanupLevel::Aggressive => "aggressive",
            CleanupLevel::Deep => "deep",
        }
    }
}

impl std::fmt::Display for CleanupLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupLevel {
    type Err = ReclaimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CleanupLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ReclaimError::Validation {
                field: "cleanup_level".to_string(),
                message: format!("unknown cleanup level: {}", s),
            })
    }
}

/// Work reported by a successful task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub items_processed: u64,
    pub items_removed: u64,
    pub memory_freed_bytes: u64,
}

/// Result of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupTaskResult {
    pub task_type: CleanupTaskType,
    pub success: bool,
    pub items_processed: u64,
    pub items_removed: u64,
    pub memory_freed_bytes: u64,
    pub duration: Duration,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl CleanupTaskResult {
    pub fn succeeded(task_type: CleanupTaskType, outcome: TaskOutcome, duration: Duration) -> Self {
        Self {
            task_type,
            success: true,
            items_processed: outcome.items_processed,
            items_removed: outcome.items_removed,
            memory_freed_bytes: outcome.memory_freed_bytes,
            duration,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(task_type: CleanupTaskType, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            task_type,
            success: false,
            items_processed: 0,
            items_removed: 0,
            memory_freed_bytes: 0,
            duration,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}

/// Aggregate of one level run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupRunSummary {
    pub level: CleanupLevel,
    pub results: Vec<CleanupTaskResult>,
    pub tasks_run: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items_processed: u64,
    pub items_removed: u64,
    pub memory_freed_bytes: u64,
    pub duration: Duration,
    /// Tasks not run, either unregistered or left over after cancellation.
    pub skipped: Vec<CleanupTaskType>,
    pub cancelled: bool,
}

impl CleanupRunSummary {
    pub fn new(
        level: CleanupLevel,
        results: Vec<CleanupTaskResult>,
        skipped: Vec<CleanupTaskType>,
        cancelled: bool,
        duration: Duration,
    ) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            level,
            tasks_run: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            items_processed: results.iter().map(|r| r.items_processed).sum(),
            items_removed: results.iter().map(|r| r.items_removed).sum(),
            memory_freed_bytes: results.iter().map(|r| r.memory_freed_bytes).sum(),
            duration,
            results,
            skipped,
            cancelled,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.skipped.is_empty()
    }
}

/// Cumulative orchestrator statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Level runs completed.
    pub total_cleanups: u64,
    pub total_tasks_run: u64,
    pub total_memory_freed: u64,
    /// Successful results over results in the history window (0.0 when empty).
    pub success_rate: f64,
    pub last_run_at: BTreeMap<CleanupTaskType, DateTime<Utc>>,
    pub history_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_task_sets() {
        assert_eq!(CleanupLevel::Minimal.tasks(), &[CleanupTaskType::ExpiredEntrySweep]);
        assert_eq!(CleanupLevel::Quick.tasks().len(), 2);
        assert!(CleanupLevel::Routine
            .tasks()
            .contains(&CleanupTaskType::EphemeralFilePurge));
        assert_eq!(CleanupLevel::Full.tasks().len(), 4);
        assert_eq!(CleanupLevel::Aggressive.tasks(), CleanupLevel::Deep.tasks());
        assert_eq!(CleanupLevel::Deep.tasks().len(), 7);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("quick".parse::<CleanupLevel>().unwrap(), CleanupLevel::Quick);
        assert_eq!(" Deep ".parse::<CleanupLevel>().unwrap(), CleanupLevel::Deep);
        assert!("heavy".parse::<CleanupLevel>().is_err());
    }

    #[test]
    fn test_level_as_map_key() {
        let mut map = BTreeMap::new();
        map.insert(CleanupLevel::Quick, 300u64);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"quick":300}"#);
    }

    #[test]
    fn test_summary_totals() {
        let ok = CleanupTaskResult::succeeded(
            CleanupTaskType::WeakRefSweep,
            TaskOutcome {
                items_processed: 10,
                items_removed: 4,
                memory_freed_bytes: 400,
            },
            Duration::from_millis(5),
        );
        let failed = CleanupTaskResult::failed(
            CleanupTaskType::LeakRepair,
            "boom",
            Duration::from_millis(1),
        );
        let summary = CleanupRunSummary::new(
            CleanupLevel::Full,
            vec![ok, failed],
            vec![CleanupTaskType::ForcedReclaim],
            false,
            Duration::from_millis(10),
        );

        assert_eq!(summary.tasks_run, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.items_removed, 4);
        assert_eq!(summary.memory_freed_bytes, 400);
        assert!(!summary.all_succeeded());
    }
}
