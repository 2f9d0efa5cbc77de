//! Batched, fault-isolated execution of cleanup levels.

use super::tasks::CleanupTask;
use super::types::{
    CleanupLevel, CleanupRunSummary, CleanupStats, CleanupTaskResult, CleanupTaskType,
};
use crate::cache::PressureLevel;
use crate::cancel::CancellationToken;
use crate::config::CleanupDefaults;
use crate::error::ReclaimError;
use crate::events::{EventBus, ReclaimEvent};
use crate::schedule::PeriodicTask;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct CleanupHistory {
    results: VecDeque<CleanupTaskResult>,
    total_cleanups: u64,
    total_tasks_run: u64,
    total_memory_freed: u64,
    last_run_at: BTreeMap<CleanupTaskType, DateTime<Utc>>,
}

impl CleanupHistory {
    fn record(&mut self, summary: &CleanupRunSummary, cap: usize) {
        self.total_cleanups += 1;
        self.total_tasks_run += summary.tasks_run as u64;
        self.total_memory_freed += summary.memory_freed_bytes;
        for result in &summary.results {
            self.last_run_at.insert(result.task_type, result.finished_at);
            self.results.push_back(result.clone());
        }
        while self.results.len() > cap {
            self.results.pop_front();
        }
    }
}

/// Runs cleanup levels in bounded batches and keeps a rolling history.
pub struct CleanupOrchestrator {
    tasks: RwLock<HashMap<CleanupTaskType, Arc<dyn CleanupTask>>>,
    max_parallel: usize,
    batch_delay: Duration,
    history_cap: usize,
    events: EventBus,
    /// Serialises level runs.
    run_lock: tokio::sync::Mutex<()>,
    history: Mutex<CleanupHistory>,
    token: Mutex<CancellationToken>,
    schedules: Mutex<Vec<PeriodicTask>>,
    emergency_listener: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupOrchestrator {
    pub fn new(events: EventBus, max_parallel: usize, batch_delay: Duration) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            max_parallel: max_parallel.max(1),
            batch_delay,
            history_cap: CleanupDefaults::HISTORY_CAP,
            events,
            run_lock: tokio::sync::Mutex::new(()),
            history: Mutex::new(CleanupHistory::default()),
            token: Mutex::new(CancellationToken::new()),
            schedules: Mutex::new(Vec::new()),
            emergency_listener: Mutex::new(None),
        }
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    /// Register a task, replacing any task of the same type.
    pub fn register_task(&self, task: Arc<dyn CleanupTask>) {
        let task_type = task.task_type();
        let replaced = self
            .tasks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(task_type, task)
            .is_some();
        if replaced {
            debug!("Replaced cleanup task {}", task_type);
        }
    }

    pub fn register_tasks(&self, tasks: impl IntoIterator<Item = Arc<dyn CleanupTask>>) {
        for task in tasks {
            self.register_task(task);
        }
    }

    pub fn registered_tasks(&self) -> Vec<CleanupTaskType> {
        let mut types: Vec<_> = self
            .tasks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect();
        types.sort();
        types
    }

    fn task(&self, task_type: CleanupTaskType) -> Option<Arc<dyn CleanupTask>> {
        self.tasks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&task_type)
            .cloned()
    }

    fn history(&self) -> MutexGuard<'_, CleanupHistory> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_token(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run every task of `level`.
    ///
    /// Tasks run in batches of at most `max_parallel`, with a pause between
    /// batches. A failing or panicking task is recorded and its siblings
    /// still run. After cancellation the batch in flight completes and the
    /// remaining tasks are reported as skipped.
    pub async fn run_level(&self, level: CleanupLevel) -> CleanupRunSummary {
        let _guard = self.run_lock.lock().await;
        let token = self.current_token();
        let started = Instant::now();

        let mut runnable = Vec::new();
        let mut skipped = Vec::new();
        for &task_type in level.tasks() {
            match self.task(task_type) {
                Some(task) => runnable.push(task),
                None => {
                    debug!("No task registered for {}, skipping", task_type);
                    skipped.push(task_type);
                }
            }
        }

        let batches: Vec<&[Arc<dyn CleanupTask>]> = runnable.chunks(self.max_parallel).collect();
        let mut results = Vec::with_capacity(runnable.len());
        let mut cancelled = false;

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            if token.is_cancelled() {
                cancelled = true;
                skipped.extend(
                    batches[index..]
                        .iter()
                        .flat_map(|batch| batch.iter().map(|task| task.task_type())),
                );
                warn!("Cleanup {} cancelled, skipping {} remaining tasks", level, skipped.len());
                break;
            }

            let batch_results = join_all(batch.iter().map(|task| run_isolated(Arc::clone(task)))).await;
            results.extend(batch_results);
        }

        let summary = CleanupRunSummary::new(level, results, skipped, cancelled, started.elapsed());
        self.history().record(&summary, self.history_cap);

        for failed in summary.results.iter().filter(|r| !r.success) {
            warn!(
                "Cleanup task {} failed: {}",
                failed.task_type,
                failed.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.events
            .publish(ReclaimEvent::CleanupCompleted(summary.clone()));

        summary
    }

    /// Run a single task outside any level. `None` if it is not registered.
    pub async fn run_task(&self, task_type: CleanupTaskType) -> Option<CleanupTaskResult> {
        let task = self.task(task_type)?;
        let _guard = self.run_lock.lock().await;
        let result = run_isolated(task).await;

        let mut history = self.history();
        history.total_tasks_run += 1;
        history.total_memory_freed += result.memory_freed_bytes;
        history.last_run_at.insert(result.task_type, result.finished_at);
        history.results.push_back(result.clone());
        while history.results.len() > self.history_cap {
            history.results.pop_front();
        }

        Some(result)
    }

    pub fn stats(&self) -> CleanupStats {
        let history = self.history();
        let successes = history.results.iter().filter(|r| r.success).count();
        let success_rate = if history.results.is_empty() {
            0.0
        } else {
            successes as f64 / history.results.len() as f64
        };
        CleanupStats {
            total_cleanups: history.total_cleanups,
            total_tasks_run: history.total_tasks_run,
            total_memory_freed: history.total_memory_freed,
            success_rate,
            last_run_at: history.last_run_at.clone(),
            history_len: history.results.len(),
        }
    }

    /// Rolling history, oldest first.
    pub fn history_results(&self) -> Vec<CleanupTaskResult> {
        self.history().results.iter().cloned().collect()
    }

    /// Start a timer per scheduled level. Replaces any previous schedules.
    pub fn start(self: &Arc<Self>, schedules: &[(CleanupLevel, Duration)]) {
        let token = self.current_token();
        let mut timers = self
            .schedules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        timers.clear();

        for &(level, interval) in schedules {
            let orchestrator = Arc::clone(self);
            timers.push(PeriodicTask::spawn(
                format!("cleanup-{}", level),
                interval,
                token.clone(),
                move || {
                    let orchestrator = Arc::clone(&orchestrator);
                    async move {
                        orchestrator.run_level(level).await;
                    }
                },
            ));
            info!("Scheduled {} cleanup every {:?}", level, interval);
        }
    }

    /// Run the aggressive level whenever pressure enters emergency.
    pub fn listen_for_emergency(self: &Arc<Self>) {
        let mut rx = self.events.subscribe();
        let token = self.current_token();
        let orchestrator = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    Ok(ReclaimEvent::PressureChanged(change))
                        if change.level == PressureLevel::Emergency =>
                    {
                        info!("Emergency memory pressure, running aggressive cleanup");
                        orchestrator.run_level(CleanupLevel::Aggressive).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Emergency listener lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Emergency listener stopped");
        });

        if let Some(previous) = self
            .emergency_listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle)
        {
            previous.abort();
        }
    }

    /// Cancel schedules and the emergency listener. A run in flight finishes
    /// its current batch.
    pub fn stop(&self) {
        // Later runs get a fresh token; everything started so far sees the
        // cancelled one.
        let previous = std::mem::replace(
            &mut *self
                .token
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            CancellationToken::new(),
        );
        previous.cancel();
        for timer in self
            .schedules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
        {
            timer.stop();
        }
        info!("Cleanup orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.schedules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(PeriodicTask::is_running)
    }
}

/// Run one task on its own tokio task so errors and panics stay contained.
async fn run_isolated(task: Arc<dyn CleanupTask>) -> CleanupTaskResult {
    let task_type = task.task_type();
    let started = Instant::now();

    let result = tokio::spawn(async move { task.run().await }).await;
    let duration = started.elapsed();

    match result {
        Ok(Ok(outcome)) => CleanupTaskResult::succeeded(task_type, outcome, duration),
        Ok(Err(e)) => CleanupTaskResult::failed(task_type, e.to_string(), duration),
        Err(join_error) if join_error.is_panic() => {
            error!("Cleanup task {} panicked", task_type);
            let err = ReclaimError::TaskPanicked {
                task: task_type.to_string(),
            };
            CleanupTaskResult::failed(task_type, err.to_string(), duration)
        }
        Err(join_error) => CleanupTaskResult::failed(task_type, join_error.to_string(), duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::tasks::FnTask;
    use crate::cleanup::TaskOutcome;
    use crate::events::PressureChanged;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok_task(task_type: CleanupTaskType, removed: u64) -> Arc<dyn CleanupTask> {
        Arc::new(FnTask::new(task_type, move || async move {
            Ok(TaskOutcome {
                items_processed: removed,
                items_removed: removed,
                memory_freed_bytes: removed * 10,
            })
        }))
    }

    async fn explode() -> crate::error::Result<TaskOutcome> {
        panic!("task blew up")
    }

    fn orchestrator(max_parallel: usize) -> Arc<CleanupOrchestrator> {
        Arc::new(CleanupOrchestrator::new(
            EventBus::new(32),
            max_parallel,
            Duration::from_millis(100),
        ))
    }

    fn register_all_ok(orchestrator: &CleanupOrchestrator) {
        for task_type in CleanupTaskType::ALL {
            orchestrator.register_task(ok_task(task_type, 1));
        }
    }

    #[tokio::test]
    async fn test_failing_task_is_isolated() {
        let orchestrator = orchestrator(3);
        orchestrator.register_task(ok_task(CleanupTaskType::WeakRefSweep, 2));
        orchestrator.register_task(Arc::new(FnTask::new(
            CleanupTaskType::ExpiredEntrySweep,
            || async { Err(ReclaimError::Other("disk on fire".into())) },
        )));
        orchestrator.register_task(ok_task(CleanupTaskType::LeakRepair, 3));
        orchestrator.register_task(ok_task(CleanupTaskType::ForcedReclaim, 0));

        let summary = orchestrator.run_level(CleanupLevel::Full).await;

        assert_eq!(summary.tasks_run, 4);
        assert_eq!(summary.failed, 1);
        let failed = &summary.results[1];
        assert_eq!(failed.task_type, CleanupTaskType::ExpiredEntrySweep);
        assert!(!failed.success);
        assert!(failed.error.as_deref().unwrap().contains("disk on fire"));
        assert!(summary.results[0].success);
        assert!(summary.results[2].success);
        assert_eq!(summary.items_removed, 5);
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let orchestrator = orchestrator(3);
        orchestrator.register_task(ok_task(CleanupTaskType::WeakRefSweep, 1));
        orchestrator.register_task(Arc::new(FnTask::new(
            CleanupTaskType::ExpiredEntrySweep,
            explode,
        )));

        let summary = orchestrator.run_level(CleanupLevel::Quick).await;
        assert_eq!(summary.tasks_run, 2);
        assert!(summary.results[0].success);
        assert!(!summary.results[1].success);
        assert!(summary.results[1].error.as_deref().unwrap().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_respect_parallelism() {
        let orchestrator = orchestrator(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for task_type in CleanupTaskType::ALL {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            orchestrator.register_task(Arc::new(FnTask::new(task_type, move || {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(TaskOutcome::default())
                }
            })));
        }

        let summary = orchestrator.run_level(CleanupLevel::Deep).await;
        assert_eq!(summary.tasks_run, 7);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        // Three batches of 50ms plus two 100ms delays.
        assert!(summary.duration >= Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_unregistered_tasks_are_skipped() {
        let orchestrator = orchestrator(3);
        orchestrator.register_task(ok_task(CleanupTaskType::ExpiredEntrySweep, 1));

        let summary = orchestrator.run_level(CleanupLevel::Routine).await;
        assert_eq!(summary.tasks_run, 1);
        assert_eq!(summary.skipped, vec![CleanupTaskType::EphemeralFilePurge]);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_register_replaces_by_type() {
        let orchestrator = orchestrator(3);
        orchestrator.register_task(ok_task(CleanupTaskType::ExpiredEntrySweep, 1));
        orchestrator.register_task(ok_task(CleanupTaskType::ExpiredEntrySweep, 9));
        assert_eq!(orchestrator.registered_tasks(), vec![CleanupTaskType::ExpiredEntrySweep]);

        let summary = orchestrator.run_level(CleanupLevel::Minimal).await;
        assert_eq!(summary.items_removed, 9);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let orchestrator = Arc::new(
            CleanupOrchestrator::new(EventBus::new(8), 3, Duration::ZERO).with_history_cap(5),
        );
        register_all_ok(&orchestrator);

        orchestrator.run_level(CleanupLevel::Deep).await;
        orchestrator.run_level(CleanupLevel::Quick).await;

        let stats = orchestrator.stats();
        assert_eq!(stats.history_len, 5);
        assert_eq!(stats.total_cleanups, 2);
        assert_eq!(stats.total_tasks_run, 9);
        assert_eq!(stats.total_memory_freed, 90);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.last_run_at.len(), 7);

        let history = orchestrator.history_results();
        assert_eq!(history.last().unwrap().task_type, CleanupTaskType::ExpiredEntrySweep);
    }

    #[tokio::test]
    async fn test_run_publishes_summary() {
        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let orchestrator = CleanupOrchestrator::new(events, 3, Duration::ZERO);
        register_all_ok(&orchestrator);

        orchestrator.run_level(CleanupLevel::Minimal).await;
        match rx.recv().await.unwrap() {
            ReclaimEvent::CleanupCompleted(summary) => {
                assert_eq!(summary.level, CleanupLevel::Minimal);
                assert_eq!(summary.succeeded, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_single_task() {
        let orchestrator = orchestrator(3);
        orchestrator.register_task(ok_task(CleanupTaskType::LeakRepair, 2));

        let result = orchestrator.run_task(CleanupTaskType::LeakRepair).await.unwrap();
        assert!(result.success);
        assert!(orchestrator.run_task(CleanupTaskType::ForcedReclaim).await.is_none());
        assert_eq!(orchestrator.stats().history_len, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_skips_remaining_batches() {
        let orchestrator = orchestrator(3);
        register_all_ok(&orchestrator);

        let runner = Arc::clone(&orchestrator);
        let run = tokio::spawn(async move { runner.run_level(CleanupLevel::Deep).await });

        // Let the first batch finish and the inter-batch delay begin.
        tokio::time::sleep(Duration::from_millis(10)).await;
        orchestrator.stop();

        let summary = run.await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.tasks_run, 3);
        assert_eq!(summary.skipped.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_levels_run() {
        let orchestrator = orchestrator(3);
        register_all_ok(&orchestrator);
        orchestrator.start(&[(CleanupLevel::Minimal, Duration::from_secs(60))]);
        assert!(orchestrator.is_running());

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(orchestrator.stats().total_cleanups, 2);

        orchestrator.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(orchestrator.stats().total_cleanups, 2);
    }

    #[tokio::test]
    async fn test_emergency_triggers_aggressive_cleanup() {
        let events = EventBus::new(8);
        let orchestrator = Arc::new(CleanupOrchestrator::new(events.clone(), 3, Duration::ZERO));
        register_all_ok(&orchestrator);
        let mut rx = events.subscribe();
        orchestrator.listen_for_emergency();

        events.publish(ReclaimEvent::PressureChanged(PressureChanged {
            level: PressureLevel::Emergency,
            previous_level: PressureLevel::Critical,
            usage_percent: 92.0,
            available_bytes: 8,
            used_bytes: 92,
            timestamp: Utc::now(),
            message: "emergency".into(),
        }));

        loop {
            match rx.recv().await.unwrap() {
                ReclaimEvent::CleanupCompleted(summary) => {
                    assert_eq!(summary.level, CleanupLevel::Aggressive);
                    assert_eq!(summary.tasks_run, 7);
                    break;
                }
                _ => continue,
            }
        }
        orchestrator.stop();
    }
}
