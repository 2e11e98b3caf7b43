//! Task execution listeners
//!
//! Listeners are notified sequentially in registration order. A panicking
//! listener is logged and skipped; it never stops delivery to the others
//! or affects the task outcome.

use crate::error::TaskFailure;
use crate::pattern::CronPattern;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

/// Information about one task execution
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Unique id of this execution
    pub execution_id: String,

    /// Id of the registered task
    pub task_id: String,

    /// Pattern that matched
    pub pattern: Arc<CronPattern>,

    /// Tick instant that triggered the execution
    pub scheduled_at: DateTime<Utc>,

    /// When the executor picked the task up
    pub started_at: DateTime<Utc>,
}

/// Observer of task executions
///
/// All methods default to doing nothing.
pub trait TaskListener: Send + Sync {
    /// Called before the task body runs
    fn on_start(&self, _ctx: &TaskContext) {}

    /// Called after the task body completed normally
    fn on_succeeded(&self, _ctx: &TaskContext) {}

    /// Called after the task body returned an error or panicked
    fn on_failed(&self, _ctx: &TaskContext, _error: &TaskFailure) {}
}

/// Lock-protected list of listeners
#[derive(Default)]
pub struct ListenerManager {
    listeners: RwLock<Vec<Arc<dyn TaskListener>>>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn add(&self, listener: Arc<dyn TaskListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Remove a previously registered listener (compared by identity)
    pub fn remove(&self, listener: &Arc<dyn TaskListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn TaskListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn notify_start(&self, ctx: &TaskContext) {
        for listener in self.snapshot() {
            guard(ctx, "on_start", || listener.on_start(ctx));
        }
    }

    pub fn notify_succeeded(&self, ctx: &TaskContext) {
        for listener in self.snapshot() {
            guard(ctx, "on_succeeded", || listener.on_succeeded(ctx));
        }
    }

    /// Report a failure; with no listeners the failure is logged instead
    pub fn notify_failed(&self, ctx: &TaskContext, error: &TaskFailure) {
        let listeners = self.snapshot();
        if listeners.is_empty() {
            tracing::error!(
                task_id = %ctx.task_id,
                execution_id = %ctx.execution_id,
                error = %error,
                "Scheduled task failed"
            );
            return;
        }

        for listener in listeners {
            guard(ctx, "on_failed", || listener.on_failed(ctx, error));
        }
    }
}

fn same_listener(a: &Arc<dyn TaskListener>, b: &Arc<dyn TaskListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn guard(ctx: &TaskContext, hook: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::warn!(
            task_id = %ctx.task_id,
            hook,
            panic = %panic_message(payload.as_ref()),
            "Task listener panicked"
        );
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
