//! Cleanup orchestration.
//!
//! Seven independent task types are grouped into named levels. A level runs
//! its tasks in batches bounded by the parallelism limit, isolating each
//! task so one failure never aborts its siblings. Levels can run on
//! schedules, on demand, or in response to emergency memory pressure.

mod orchestrator;
mod tasks;
mod types;

pub use orchestrator::CleanupOrchestrator;
pub use tasks::{
    builtin_tasks, BuiltinTaskContext, CachePurgeTask, CleanupTask, EphemeralFilePurgeTask,
    ExpiredEntrySweepTask, FnTask, ForcedReclaimTask, LeakRepairTask, WeakRefSweepTask,
};
pub use types::{
    CleanupLevel, CleanupRunSummary, CleanupStats, CleanupTaskResult, CleanupTaskType,
    TaskOutcome,
};
