//! Task registry
//!
//! Holds the canonical id → task mapping. Every operation takes one exclusive
//! lock for the duration of the list operation only; due-task scans return a
//! detached copy so dispatch never happens under the lock.

use crate::error::{CronError, Result};
use crate::pattern::CronPattern;
use crate::task::ScheduledTask;
use chrono::NaiveDateTime;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Thread-safe, insertion-ordered collection of scheduled tasks
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ScheduledTask>> {
        // Nothing panics while holding the lock, so a poisoned list is intact
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a task, replacing any entry with the same id in place.
    ///
    /// Returns `true` if an existing entry was replaced.
    pub fn add(&self, task: ScheduledTask) -> bool {
        let mut tasks = self.lock();
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => {
                *existing = task;
                true
            }
            None => {
                tasks.push(task);
                false
            }
        }
    }

    /// Remove a task by id
    pub fn remove(&self, id: &str) -> Option<ScheduledTask> {
        let mut tasks = self.lock();
        let idx = tasks.iter().position(|t| t.id == id)?;
        Some(tasks.remove(idx))
    }

    /// Swap the pattern of an existing task
    pub fn replace_pattern(&self, id: &str, pattern: CronPattern) -> Result<()> {
        let mut tasks = self.lock();
        let entry = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| CronError::TaskNotFound(id.to_string()))?;
        entry.pattern = Arc::new(pattern);
        Ok(())
    }

    /// Look up a task by id
    pub fn get(&self, id: &str) -> Option<ScheduledTask> {
        self.lock().iter().find(|t| t.id == id).cloned()
    }

    /// Pattern of a task
    pub fn pattern(&self, id: &str) -> Option<Arc<CronPattern>> {
        self.lock()
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.pattern.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.lock().iter().map(|t| t.id.clone()).collect()
    }

    /// Remove every task
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Copy of every task matching the local time `t`
    pub fn snapshot_due(&self, t: &NaiveDateTime, match_second: bool) -> Vec<ScheduledTask> {
        self.lock()
            .iter()
            .filter(|task| task.pattern.matches_tick(t, match_second))
            .cloned()
            .collect()
    }
}
