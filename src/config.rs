//! Scheduler configuration

use crate::error::{CronError, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration, fixed when the scheduler is constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick every second and honour second fields (default: tick every minute)
    pub match_second: bool,

    /// Offset from UTC in seconds used to evaluate patterns (default: 0)
    pub utc_offset_secs: i32,

    /// How long `stop()` waits for the control loop to exit (default: 5000)
    pub stop_timeout_ms: u64,

    /// Capacity of the scheduler event channel (default: 100)
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            match_second: false,
            utc_offset_secs: 0,
            stop_timeout_ms: 5_000,
            event_capacity: 100,
        }
    }
}

impl SchedulerConfig {
    /// Parse a JSON document; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_match_second(mut self, match_second: bool) -> Self {
        self.match_second = match_second;
        self
    }

    pub fn with_utc_offset_secs(mut self, offset: i32) -> Self {
        self.utc_offset_secs = offset;
        self
    }

    pub fn with_stop_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stop_timeout_ms = timeout_ms;
        self
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if FixedOffset::east_opt(self.utc_offset_secs).is_none() {
            return Err(CronError::Config(format!(
                "utc_offset_secs {} must be within ±86399",
                self.utc_offset_secs
            )));
        }
        if self.event_capacity == 0 {
            return Err(CronError::Config(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Time zone used to decompose tick instants
    pub fn time_zone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_secs).ok_or_else(|| {
            CronError::Config(format!("invalid utc_offset_secs {}", self.utc_offset_secs))
        })
    }

    /// Interval between ticks
    pub fn tick_interval(&self) -> Duration {
        if self.match_second {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(60)
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
