//! Task execution
//!
//! Every dispatched execution runs on its own tokio task. Errors and panics
//! from the task body are captured here and reported through listeners and
//! scheduler events.

use crate::error::TaskFailure;
use crate::listener::{panic_message, ListenerManager, TaskContext};
use crate::scheduler::SchedulerEvent;
use crate::task::ScheduledTask;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed(TaskFailure),
}

/// Result of one task execution
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// Context shared with listeners
    pub context: TaskContext,

    /// When the task body returned
    pub finished_at: DateTime<Utc>,

    /// Success or failure
    pub outcome: ExecutionOutcome,
}

impl ExecutionRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Succeeded
    }

    /// Wall-clock duration of the task body in milliseconds
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.context.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Runs scheduled tasks on independent tokio tasks
#[derive(Clone)]
pub struct TaskExecutor {
    listeners: Arc<ListenerManager>,
    events: broadcast::Sender<SchedulerEvent>,
    active: Arc<AtomicUsize>,
}

impl TaskExecutor {
    pub fn new(listeners: Arc<ListenerManager>, events: broadcast::Sender<SchedulerEvent>) -> Self {
        Self {
            listeners,
            events,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of executions that have been spawned and not yet finished
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn one execution of `task` and return immediately
    pub fn run(
        &self,
        task: ScheduledTask,
        scheduled_at: DateTime<Utc>,
    ) -> JoinHandle<ExecutionRecord> {
        let executor = self.clone();
        self.active.fetch_add(1, Ordering::SeqCst);
        let active = ActiveGuard(self.active.clone());

        tokio::spawn(async move {
            let _active = active;
            executor.execute(task, scheduled_at).await
        })
    }

    /// Run one execution of `task` to completion on the current tokio task
    pub async fn execute(
        &self,
        task: ScheduledTask,
        scheduled_at: DateTime<Utc>,
    ) -> ExecutionRecord {
        let context = TaskContext {
            execution_id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            pattern: task.pattern.clone(),
            scheduled_at,
            started_at: Utc::now(),
        };

        self.listeners.notify_start(&context);
        let _ = self.events.send(SchedulerEvent::TaskStarted {
            task_id: context.task_id.clone(),
            execution_id: context.execution_id.clone(),
        });

        let outcome = match AssertUnwindSafe(task.task.execute()).catch_unwind().await {
            Ok(Ok(())) => ExecutionOutcome::Succeeded,
            Ok(Err(e)) => ExecutionOutcome::Failed(TaskFailure::Error(e.to_string())),
            Err(payload) => {
                ExecutionOutcome::Failed(TaskFailure::Panicked(panic_message(payload.as_ref())))
            }
        };

        match &outcome {
            ExecutionOutcome::Succeeded => {
                tracing::debug!(
                    task_id = %context.task_id,
                    execution_id = %context.execution_id,
                    "Scheduled task succeeded"
                );
                self.listeners.notify_succeeded(&context);
                let _ = self.events.send(SchedulerEvent::TaskSucceeded {
                    task_id: context.task_id.clone(),
                    execution_id: context.execution_id.clone(),
                });
            }
            ExecutionOutcome::Failed(failure) => {
                self.listeners.notify_failed(&context, failure);
                let _ = self.events.send(SchedulerEvent::TaskFailed {
                    task_id: context.task_id.clone(),
                    execution_id: context.execution_id.clone(),
                    error: failure.to_string(),
                });
            }
        }

        ExecutionRecord {
            context,
            finished_at: Utc::now(),
            outcome,
        }
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::TaskListener;
    use crate::pattern::CronPattern;
    use crate::task::{FnTask, Task, TaskError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outcomes {
        started: Mutex<Vec<String>>,
        succeeded: Mutex<Vec<String>>,
        failed: Mutex<Vec<TaskFailure>>,
    }

    impl TaskListener for Outcomes {
        fn on_start(&self, ctx: &TaskContext) {
            self.started.lock().unwrap().push(ctx.task_id.clone());
        }

        fn on_succeeded(&self, ctx: &TaskContext) {
            self.succeeded.lock().unwrap().push(ctx.task_id.clone());
        }

        fn on_failed(&self, _ctx: &TaskContext, error: &TaskFailure) {
            self.failed.lock().unwrap().push(error.clone());
        }
    }

    fn executor_with(
        listener: Arc<Outcomes>,
    ) -> (TaskExecutor, broadcast::Receiver<SchedulerEvent>) {
        let listeners = Arc::new(ListenerManager::new());
        listeners.add(listener);
        let (tx, rx) = broadcast::channel(16);
        (TaskExecutor::new(listeners, tx), rx)
    }

    fn scheduled(id: &str, task: impl Task + 'static) -> ScheduledTask {
        ScheduledTask::new(id, CronPattern::parse("* * * * *").unwrap(), Arc::new(task))
    }

    #[tokio::test]
    async fn test_success_is_reported() {
        let outcomes = Arc::new(Outcomes::default());
        let (executor, mut rx) = executor_with(outcomes.clone());

        let record = executor
            .run(scheduled("ok", FnTask::new(|| async { Ok(()) })), Utc::now())
            .await
            .unwrap();

        assert!(record.is_success());
        assert_eq!(record.context.task_id, "ok");
        assert_eq!(*outcomes.started.lock().unwrap(), vec!["ok"]);
        assert_eq!(*outcomes.succeeded.lock().unwrap(), vec!["ok"]);
        assert!(outcomes.failed.lock().unwrap().is_empty());

        assert!(matches!(rx.try_recv().unwrap(), SchedulerEvent::TaskStarted { .. }));
        assert!(matches!(rx.try_recv().unwrap(), SchedulerEvent::TaskSucceeded { .. }));
    }

    #[tokio::test]
    async fn test_error_is_captured() {
        let outcomes = Arc::new(Outcomes::default());
        let (executor, mut rx) = executor_with(outcomes.clone());

        let task = FnTask::new(|| async { Err::<(), TaskError>("connection refused".into()) });
        let record = executor.run(scheduled("err", task), Utc::now()).await.unwrap();

        assert_eq!(
            record.outcome,
            ExecutionOutcome::Failed(TaskFailure::Error("connection refused".into()))
        );
        assert_eq!(outcomes.failed.lock().unwrap().len(), 1);

        let _started = rx.try_recv().unwrap();
        match rx.try_recv().unwrap() {
            SchedulerEvent::TaskFailed { task_id, error, .. } => {
                assert_eq!(task_id, "err");
                assert!(error.contains("connection refused"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let outcomes = Arc::new(Outcomes::default());
        let (executor, _rx) = executor_with(outcomes.clone());

        let task = FnTask::new(|| async {
            if true {
                panic!("task blew up");
            }
            Ok(())
        });
        let record = executor.run(scheduled("panic", task), Utc::now()).await.unwrap();

        assert_eq!(
            record.outcome,
            ExecutionOutcome::Failed(TaskFailure::Panicked("task blew up".into()))
        );
        assert_eq!(
            *outcomes.failed.lock().unwrap(),
            vec![TaskFailure::Panicked("task blew up".into())]
        );
    }

    #[tokio::test]
    async fn test_active_count_returns_to_zero() {
        let outcomes = Arc::new(Outcomes::default());
        let (executor, _rx) = executor_with(outcomes);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let task = FnTask::new(move || {
            let release_rx = release_rx.clone();
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(())
            }
        });

        let handle = executor.run(scheduled("slow", task), Utc::now());
        assert_eq!(executor.active(), 1);

        release_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(executor.active(), 0);
    }
}
