//! Cron task scheduler
//!
//! One control loop per scheduler wakes at every tick boundary (top of each
//! minute, or each second when `match_second` is set), takes a snapshot of the
//! due tasks from the registry and hands each to the executor. The loop never
//! waits for task completion, so overlapping runs of the same task execute in
//! parallel.

use crate::config::SchedulerConfig;
use crate::error::{CronError, Result};
use crate::executor::{ExecutionRecord, TaskExecutor};
use crate::listener::{ListenerManager, TaskListener};
use crate::pattern::CronPattern;
use crate::registry::TaskRegistry;
use crate::task::{ScheduledTask, Task};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Scheduler events for monitoring
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Scheduler started
    Started,
    /// Scheduler stopped
    Stopped,
    /// Task started execution
    TaskStarted {
        task_id: String,
        execution_id: String,
    },
    /// Task completed successfully
    TaskSucceeded {
        task_id: String,
        execution_id: String,
    },
    /// Task returned an error or panicked
    TaskFailed {
        task_id: String,
        execution_id: String,
        error: String,
    },
}

/// Background cron scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    launcher: Launcher,
    listeners: Arc<ListenerManager>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    control: Mutex<Option<ControlLoop>>,
}

struct ControlLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Snapshot-and-dispatch step shared by the control loop and `launch_due`
#[derive(Clone)]
struct Launcher {
    registry: Arc<TaskRegistry>,
    executor: TaskExecutor,
    time_zone: FixedOffset,
    match_second: bool,
}

impl Launcher {
    fn launch(&self, at: DateTime<Utc>) -> Vec<JoinHandle<ExecutionRecord>> {
        let local = at.with_timezone(&self.time_zone).naive_local();
        let due = self.registry.snapshot_due(&local, self.match_second);

        tracing::debug!(tick = %local, due = due.len(), "Scheduler tick");

        due.into_iter()
            .map(|task| {
                tracing::debug!(task_id = %task.id, "Dispatching cron task");
                self.executor.run(task, at)
            })
            .collect()
    }
}

impl Scheduler {
    /// Create a stopped scheduler
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let time_zone = config.time_zone()?;
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let listeners = Arc::new(ListenerManager::new());

        Ok(Self {
            launcher: Launcher {
                registry: Arc::new(TaskRegistry::new()),
                executor: TaskExecutor::new(listeners.clone(), event_tx.clone()),
                time_zone,
                match_second: config.match_second,
            },
            config,
            listeners,
            event_tx,
            control: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Subscribe to scheduler events
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Task registration
    // ------------------------------------------------------------------

    /// Register a task under `id`, replacing any task with the same id.
    ///
    /// Nothing is registered if the pattern fails to parse.
    pub fn register_task(&self, id: &str, pattern: &str, task: impl Task + 'static) -> Result<()> {
        let pattern = CronPattern::parse(pattern)?;
        self.register_pattern(id, pattern, Arc::new(task));
        Ok(())
    }

    /// Register an already parsed pattern
    pub fn register_pattern(&self, id: &str, pattern: CronPattern, task: Arc<dyn Task>) {
        let replaced = self
            .launcher
            .registry
            .add(ScheduledTask::new(id, pattern, task));
        tracing::info!(task_id = id, replaced, "Registered cron task");
    }

    /// Register a task under a generated id and return the id
    pub fn schedule(&self, pattern: &str, task: impl Task + 'static) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.register_task(&id, pattern, task)?;
        Ok(id)
    }

    /// Remove a task; returns whether it was registered
    pub fn unregister_task(&self, id: &str) -> bool {
        let removed = self.launcher.registry.remove(id).is_some();
        if removed {
            tracing::info!(task_id = id, "Unregistered cron task");
        }
        removed
    }

    /// Replace the pattern of a registered task
    pub fn update_task_pattern(&self, id: &str, pattern: &str) -> Result<()> {
        let pattern = CronPattern::parse(pattern)?;
        self.launcher.registry.replace_pattern(id, pattern)?;
        tracing::info!(task_id = id, "Updated cron task pattern");
        Ok(())
    }

    /// Pattern of a registered task
    pub fn pattern(&self, id: &str) -> Option<Arc<CronPattern>> {
        self.launcher.registry.pattern(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.launcher.registry.contains(id)
    }

    pub fn task_count(&self) -> usize {
        self.launcher.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launcher.registry.is_empty()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.launcher.registry.ids()
    }

    /// Remove every registered task
    pub fn clear(&self) {
        self.launcher.registry.clear();
        tracing::info!("Cleared cron tasks");
    }

    /// Next `count` times the control loop will run a task, in the configured time zone
    pub fn upcoming(&self, id: &str, count: usize) -> Result<Vec<DateTime<FixedOffset>>> {
        let pattern = self
            .pattern(id)
            .ok_or_else(|| CronError::TaskNotFound(id.to_string()))?;
        let now = Utc::now().with_timezone(&self.launcher.time_zone);
        pattern.next_ticks(&now, count, self.config.match_second)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TaskListener>) -> bool {
        self.listeners.remove(listener)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Dispatch every task due at `at`, as one tick of the control loop would
    pub fn launch_due(&self, at: DateTime<Utc>) -> Vec<JoinHandle<ExecutionRecord>> {
        self.launcher.launch(at)
    }

    /// Number of dispatched executions still running
    pub fn active_executions(&self) -> usize {
        self.launcher.executor.active()
    }

    fn lock_control(&self) -> MutexGuard<'_, Option<ControlLoop>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the control loop and return immediately
    pub async fn start(&self) -> Result<()> {
        {
            let mut control = self.lock_control();
            if control.is_some() {
                return Err(CronError::AlreadyRunning);
            }

            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(run_loop(
                self.launcher.clone(),
                self.config.tick_interval(),
                stop_rx,
            ));
            *control = Some(ControlLoop { stop_tx, handle });
        }

        let _ = self.event_tx.send(SchedulerEvent::Started);
        tracing::info!(
            match_second = self.config.match_second,
            tasks = self.task_count(),
            "Cron scheduler started"
        );
        Ok(())
    }

    /// Stop the control loop.
    ///
    /// Waits (bounded by `stop_timeout_ms`) for the loop to observe the stop
    /// signal. Executions already dispatched keep running to completion.
    pub async fn stop(&self) -> Result<()> {
        let control = self.lock_control().take();
        let ControlLoop {
            stop_tx,
            mut handle,
        } = control.ok_or(CronError::NotRunning)?;

        let _ = stop_tx.send(true);

        match tokio::time::timeout(self.config.stop_timeout(), &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Cron scheduler loop ended abnormally");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.stop_timeout_ms,
                    "Cron scheduler loop did not stop in time; aborting"
                );
                handle.abort();
            }
        }

        let _ = self.event_tx.send(SchedulerEvent::Stopped);
        tracing::info!("Cron scheduler stopped");
        Ok(())
    }

    /// Stop the control loop and remove every task
    pub async fn stop_and_clear(&self) -> Result<()> {
        self.stop().await?;
        self.clear();
        Ok(())
    }

    /// Check if the control loop is running
    pub fn is_running(&self) -> bool {
        self.lock_control().is_some()
    }
}

/// What the control loop does next, given the wall clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickAction {
    /// Sleep this many milliseconds, then re-evaluate
    Sleep(u64),
    /// Dispatch the tick at this boundary (epoch ms)
    Dispatch(i64),
    /// The clock moved backward; continue from this boundary instead
    Realign(i64),
}

/// Decide the next step for a loop whose next boundary is `next_tick`.
///
/// A boundary more than one interval ahead means the clock moved backward.
/// A boundary one or more intervals behind means the loop fell behind or the
/// clock jumped forward; the current tick is dispatched and missed ones are
/// dropped.
fn next_action(now_ms: i64, next_tick: i64, unit_ms: i64) -> TickAction {
    let wait = next_tick - now_ms;
    if wait > unit_ms {
        TickAction::Realign(align_after(now_ms, unit_ms))
    } else if wait > 0 {
        TickAction::Sleep(wait as u64)
    } else if -wait >= unit_ms {
        TickAction::Dispatch(now_ms.div_euclid(unit_ms) * unit_ms)
    } else {
        TickAction::Dispatch(next_tick)
    }
}

/// Control loop: sleep to the next tick boundary, dispatch, repeat.
async fn run_loop(launcher: Launcher, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    let unit_ms = interval.as_millis().max(1) as i64;
    let mut next_tick = align_after(Utc::now().timestamp_millis(), unit_ms);

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let now = Utc::now().timestamp_millis();
        match next_action(now, next_tick, unit_ms) {
            TickAction::Realign(boundary) => {
                tracing::warn!(
                    ahead_ms = next_tick - now,
                    "System clock moved backward; realigning ticks"
                );
                next_tick = boundary;
            }
            TickAction::Sleep(wait_ms) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            TickAction::Dispatch(tick_ms) => {
                if tick_ms != next_tick {
                    tracing::warn!(
                        behind_ms = now - next_tick,
                        "Scheduler fell behind; resuming at current tick"
                    );
                }
                match Utc.timestamp_millis_opt(tick_ms).single() {
                    Some(tick) => {
                        launcher.launch(tick);
                    }
                    None => tracing::warn!(tick_ms, "Tick outside representable range"),
                }
                next_tick = tick_ms + unit_ms;
            }
        }
    }

    tracing::debug!("Cron scheduler loop exited");
}

/// First multiple of `unit_ms` strictly after `ms`
fn align_after(ms: i64, unit_ms: i64) -> i64 {
    (ms.div_euclid(unit_ms) + 1) * unit_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskFailure;
    use crate::executor::ExecutionOutcome;
    use crate::listener::TaskContext;
    use crate::task::{FnTask, TaskError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default()).unwrap()
    }

    fn counting_task(counter: Arc<AtomicUsize>) -> impl Task + 'static {
        FnTask::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn tick(h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 13, h, mi, s).unwrap()
    }

    #[test]
    fn test_align_after() {
        assert_eq!(align_after(0, 60_000), 60_000);
        assert_eq!(align_after(59_999, 60_000), 60_000);
        assert_eq!(align_after(60_000, 60_000), 120_000);
        assert_eq!(align_after(1_500, 1_000), 2_000);
    }

    #[test]
    fn test_next_action_on_schedule() {
        // Before the boundary: sleep the remainder
        assert_eq!(next_action(119_250, 120_000, 60_000), TickAction::Sleep(750));
        // At or just past the boundary: dispatch it
        assert_eq!(next_action(120_000, 120_000, 60_000), TickAction::Dispatch(120_000));
        assert_eq!(next_action(120_040, 120_000, 60_000), TickAction::Dispatch(120_000));
        assert_eq!(next_action(179_999, 120_000, 60_000), TickAction::Dispatch(120_000));
    }

    #[test]
    fn test_next_action_clock_moved_backward() {
        // Clock set back ten minutes: realign to the next boundary after now
        assert_eq!(next_action(530_500, 1_200_000, 60_000), TickAction::Realign(540_000));
        // Exactly one interval ahead is still a plain sleep
        assert_eq!(next_action(60_000, 120_000, 60_000), TickAction::Sleep(60_000));
    }

    #[test]
    fn test_next_action_clock_jumped_forward() {
        // Three intervals late: dispatch the current tick, skip the missed ones
        assert_eq!(next_action(300_200, 120_000, 60_000), TickAction::Dispatch(300_000));
        assert_eq!(next_action(5_400, 3_000, 1_000), TickAction::Dispatch(5_000));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = SchedulerConfig {
            event_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(Scheduler::new(config), Err(CronError::Config(_))));
    }

    #[test]
    fn test_register_and_inspect() {
        let scheduler = create_test_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .register_task("report", "0 9 * * MON-FRI", counting_task(counter.clone()))
            .unwrap();
        let generated = scheduler
            .schedule("*/5 * * * *", counting_task(counter))
            .unwrap();

        assert_eq!(scheduler.task_count(), 2);
        assert!(scheduler.contains("report"));
        assert!(scheduler.contains(&generated));
        assert_eq!(scheduler.task_ids()[0], "report");
        assert_eq!(
            scheduler.pattern("report").unwrap().as_str(),
            "0 9 * * MON-FRI"
        );
    }

    #[test]
    fn test_register_invalid_pattern_registers_nothing() {
        let scheduler = create_test_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));

        let err = scheduler
            .register_task("bad", "61 * * * *", counting_task(counter))
            .unwrap_err();
        assert!(err.is_parse_error());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_update_and_unregister() {
        let scheduler = create_test_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("job", "* * * * *", counting_task(counter))
            .unwrap();

        scheduler.update_task_pattern("job", "0 0 * * *").unwrap();
        assert_eq!(scheduler.pattern("job").unwrap().as_str(), "0 0 * * *");

        assert!(scheduler.update_task_pattern("job", "bogus").is_err());
        assert_eq!(scheduler.pattern("job").unwrap().as_str(), "0 0 * * *");

        assert!(matches!(
            scheduler.update_task_pattern("missing", "* * * * *"),
            Err(CronError::TaskNotFound(_))
        ));

        assert!(scheduler.unregister_task("job"));
        assert!(!scheduler.unregister_task("job"));
    }

    #[test]
    fn test_upcoming() {
        let scheduler = create_test_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("hourly", "0 * * * *", counting_task(counter))
            .unwrap();

        let upcoming = scheduler.upcoming("hourly", 3).unwrap();
        assert_eq!(upcoming.len(), 3);
        assert!(upcoming[0].with_timezone(&Utc) > Utc::now());
        assert_eq!((upcoming[1] - upcoming[0]).num_minutes(), 60);

        assert!(matches!(
            scheduler.upcoming("missing", 1),
            Err(CronError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_upcoming_follows_tick_resolution() {
        use chrono::Timelike;

        let scheduler = create_test_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("half-minute", "30 * * * * *", counting_task(counter.clone()))
            .unwrap();

        // Minute ticks ignore the second field
        let upcoming = scheduler.upcoming("half-minute", 2).unwrap();
        assert!(upcoming.iter().all(|t| t.second() == 0));
        assert_eq!((upcoming[1] - upcoming[0]).num_minutes(), 1);

        let scheduler =
            Scheduler::new(SchedulerConfig::default().with_match_second(true)).unwrap();
        scheduler
            .register_task("half-minute", "30 * * * * *", counting_task(counter))
            .unwrap();
        let upcoming = scheduler.upcoming("half-minute", 2).unwrap();
        assert!(upcoming.iter().all(|t| t.second() == 30));
    }

    #[tokio::test]
    async fn test_launch_due_dispatches_matching_tasks() {
        let scheduler = create_test_scheduler();
        let hourly = Arc::new(AtomicUsize::new(0));
        let minutely = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("hourly", "0 * * * *", counting_task(hourly.clone()))
            .unwrap();
        scheduler
            .register_task("minutely", "* * * * *", counting_task(minutely.clone()))
            .unwrap();

        for handle in scheduler.launch_due(tick(10, 0, 0)) {
            assert!(handle.await.unwrap().is_success());
        }
        for handle in scheduler.launch_due(tick(10, 1, 0)) {
            handle.await.unwrap();
        }

        assert_eq!(hourly.load(Ordering::SeqCst), 1);
        assert_eq!(minutely.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_launch_due_uses_configured_time_zone() {
        let scheduler =
            Scheduler::new(SchedulerConfig::default().with_utc_offset_secs(8 * 3600)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("morning", "0 9 * * *", counting_task(counter.clone()))
            .unwrap();

        // 01:00 UTC is 09:00 at UTC+8
        assert_eq!(scheduler.launch_due(tick(1, 0, 0)).len(), 1);
        assert!(scheduler.launch_due(tick(9, 0, 0)).is_empty());
    }

    #[tokio::test]
    async fn test_minute_resolution_ignores_seconds() {
        let scheduler = create_test_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("at-30s", "30 * * * * *", counting_task(counter))
            .unwrap();
        assert_eq!(scheduler.launch_due(tick(10, 0, 0)).len(), 1);

        let scheduler =
            Scheduler::new(SchedulerConfig::default().with_match_second(true)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("at-30s", "30 * * * * *", counting_task(counter))
            .unwrap();
        assert!(scheduler.launch_due(tick(10, 0, 0)).is_empty());
        assert_eq!(scheduler.launch_due(tick(10, 0, 30)).len(), 1);
    }

    #[tokio::test]
    async fn test_failing_task_does_not_affect_others() {
        struct FailureCount(AtomicUsize);

        impl TaskListener for FailureCount {
            fn on_failed(&self, _ctx: &TaskContext, _error: &TaskFailure) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let scheduler = create_test_scheduler();
        let failures = Arc::new(FailureCount(AtomicUsize::new(0)));
        scheduler.add_listener(failures.clone());

        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task(
                "broken",
                "* * * * *",
                FnTask::new(|| async { Err::<(), TaskError>("always fails".into()) }),
            )
            .unwrap();
        scheduler
            .register_task("healthy", "* * * * *", counting_task(counter.clone()))
            .unwrap();

        for minute in 0..3 {
            for handle in scheduler.launch_due(tick(10, minute, 0)) {
                handle.await.unwrap();
            }
        }

        assert_eq!(failures.0.load(Ordering::SeqCst), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_overlapping_runs_execute_in_parallel() {
        let scheduler = create_test_scheduler();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let task_gate = gate.clone();
        scheduler
            .register_task(
                "slow",
                "* * * * *",
                FnTask::new(move || {
                    let gate = task_gate.clone();
                    async move {
                        let _permit = gate.acquire().await;
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let mut handles = scheduler.launch_due(tick(10, 0, 0));
        handles.extend(scheduler.launch_due(tick(10, 1, 0)));
        assert_eq!(scheduler.active_executions(), 2);

        gate.add_permits(2);
        for handle in handles {
            let record = handle.await.unwrap();
            assert_eq!(record.outcome, ExecutionOutcome::Succeeded);
        }
        assert_eq!(scheduler.active_executions(), 0);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let scheduler = create_test_scheduler();
        let mut events = scheduler.subscribe();
        assert!(!scheduler.is_running());

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start().await,
            Err(CronError::AlreadyRunning)
        ));

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(matches!(scheduler.stop().await, Err(CronError::NotRunning)));

        assert!(matches!(events.recv().await.unwrap(), SchedulerEvent::Started));
        assert!(matches!(events.recv().await.unwrap(), SchedulerEvent::Stopped));

        // Restartable
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_and_clear() {
        let scheduler = create_test_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("job", "* * * * *", counting_task(counter))
            .unwrap();

        scheduler.start().await.unwrap();
        scheduler.stop_and_clear().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(scheduler.is_empty());
    }
}
