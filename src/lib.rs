//! # a3s-cron
//!
//! Cron-style task scheduling for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-cron` parses cron patterns (5, 6 or 7 fields), computes upcoming match
//! times, and runs registered tasks on a background tokio loop that wakes at
//! every minute (or second) boundary.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_cron::{FnTask, Scheduler, SchedulerConfig};
//!
//! # async fn example() -> a3s_cron::Result<()> {
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//!
//! scheduler.register_task(
//!     "nightly-report",
//!     "30 2 * * MON-FRI",
//!     FnTask::new(|| async {
//!         println!("building report");
//!         Ok(())
//!     }),
//! )?;
//!
//! scheduler.start().await?;
//! // ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Pattern syntax
//!
//! `[second] minute hour day-of-month month day-of-week [year]`
//!
//! - `*`, `?` (day fields), lists `1,2,3`, ranges `1-5`, wraparound ranges `22-2`
//! - steps `*/15`, `10-40/5`, `5/10`
//! - `JAN`-`DEC`, `SUN`-`SAT`, day-of-week `7` as Sunday
//! - `L` for the last day of the month
//!
//! When both day-of-month and day-of-week are restricted, a day matches if
//! either field does.
//!
//! ## Architecture
//!
//! - **CronPattern**: parsed, immutable pattern with matching and next-match search
//! - **TaskRegistry**: thread-safe id → task map
//! - **TaskExecutor**: runs each execution on its own tokio task
//! - **TaskListener**: start/success/failure callbacks
//! - **Scheduler**: control loop tying the pieces together

pub mod config;
pub mod error;
pub mod executor;
pub mod listener;
pub mod pattern;
pub mod registry;
pub mod scheduler;
pub mod task;

pub use config::SchedulerConfig;
pub use error::{CronError, Result, TaskFailure};
pub use executor::{ExecutionOutcome, ExecutionRecord, TaskExecutor};
pub use listener::{ListenerManager, TaskContext, TaskListener};
pub use pattern::{CronPattern, FieldKind, LAST_DAY_OF_MONTH};
pub use registry::TaskRegistry;
pub use scheduler::{Scheduler, SchedulerEvent};
pub use task::{BlockingTask, FnTask, ScheduledTask, Task, TaskError};
