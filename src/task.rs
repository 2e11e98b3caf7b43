//! Task bodies and registered task entries

use crate::pattern::CronPattern;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Error type returned by task bodies
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Work executed each time a task's pattern matches
///
/// Errors and panics are captured by the executor and reported to listeners;
/// they never reach the scheduler loop.
#[async_trait]
pub trait Task: Send + Sync {
    /// Run the task body once
    async fn execute(&self) -> Result<(), TaskError>;
}

/// Task backed by an async closure
///
/// ```
/// use a3s_cron::FnTask;
///
/// let task = FnTask::new(|| async {
///     println!("tick");
///     Ok(())
/// });
/// ```
pub struct FnTask<F> {
    f: F,
}

impl<F> FnTask<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), TaskError>> + Send,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    async fn execute(&self) -> Result<(), TaskError> {
        (self.f)().await
    }
}

/// Task backed by a synchronous closure, run on tokio's blocking pool
pub struct BlockingTask<F> {
    f: Arc<F>,
}

impl<F> BlockingTask<F> {
    pub fn new(f: F) -> Self
    where
        F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F> Task for BlockingTask<F>
where
    F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
{
    async fn execute(&self) -> Result<(), TaskError> {
        let f = self.f.clone();
        match tokio::task::spawn_blocking(move || (*f)()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A registered task: id, pattern and body
#[derive(Clone)]
pub struct ScheduledTask {
    pub id: String,
    pub pattern: Arc<CronPattern>,
    pub task: Arc<dyn Task>,
}

impl ScheduledTask {
    pub fn new(id: impl Into<String>, pattern: CronPattern, task: Arc<dyn Task>) -> Self {
        Self {
            id: id.into(),
            pattern: Arc::new(pattern),
            task,
        }
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}
