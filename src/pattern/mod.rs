//! Cron pattern parsing and matching
//!
//! Accepts 5, 6 or 7 whitespace separated fields:
//! ```text
//! ┌───────────── second (0-59, optional)
//! │ ┌───────────── minute (0-59)
//! │ │ ┌───────────── hour (0-23)
//! │ │ │ ┌───────────── day of month (1-31, L)
//! │ │ │ │ ┌───────────── month (1-12, jan-dec)
//! │ │ │ │ │ ┌───────────── day of week (0-7, sun-sat)
//! │ │ │ │ │ │ ┌───────────── year (1970-2099, optional)
//! │ │ │ │ │ │ │
//! * * * * * * *
//! ```
//!
//! Special characters:
//! - `*` - any value
//! - `?` - unspecified (day of month and day of week only)
//! - `,` - value list separator (e.g., `1,3,5`)
//! - `-` - range, wrapping past the maximum when start > end (e.g., `22-4`)
//! - `/` - step (e.g., `*/5`, `0/30` or `0-30/5`)
//! - `L` - last day of the month (day of month only)
//!
//! When both day of month and day of week are restricted, a date matches if
//! either of them does. A day field counts as restricted only when it leaves
//! out part of its domain, so `*/1`, `0-6` and `1-7` in day of week restrict
//! nothing.

mod field;
mod matcher;
mod next;

pub use field::{FieldKind, LAST_DAY_OF_MONTH};
pub use matcher::{BoundedMatcher, FieldMatcher, SparseMatcher};
pub use next::MAX_SEARCH_ITERATIONS;

use crate::error::{CronError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A parsed, immutable cron pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronPattern {
    text: String,
    second: FieldMatcher,
    minute: FieldMatcher,
    hour: FieldMatcher,
    day_of_month: FieldMatcher,
    month: FieldMatcher,
    day_of_week: FieldMatcher,
    year: FieldMatcher,
    /// The pattern was written with a leading second field
    has_second: bool,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl CronPattern {
    /// Parse a pattern string
    ///
    /// # Examples
    ///
    /// ```
    /// use a3s_cron::CronPattern;
    ///
    /// // Every 5 minutes
    /// let pattern = CronPattern::parse("*/5 * * * *").unwrap();
    ///
    /// // Every 30 seconds between 08:00 and 18:59
    /// let pattern = CronPattern::parse("0/30 * 8-18 * * ?").unwrap();
    ///
    /// // Midnight on the last day of every month in 2030
    /// let pattern = CronPattern::parse("0 0 0 L * ? 2030").unwrap();
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split_whitespace().collect();

        let (second, rest, year) = match parts.len() {
            5 => (None, &parts[..], None),
            6 => (Some(parts[0]), &parts[1..], None),
            7 => (Some(parts[0]), &parts[1..6], Some(parts[6])),
            n => return Err(CronError::FieldCount(n)),
        };

        let day_of_month = FieldMatcher::build(rest[2], FieldKind::DayOfMonth)?;
        let day_of_week = FieldMatcher::build(rest[4], FieldKind::DayOfWeek)?;

        Ok(Self {
            text: parts.join(" "),
            second: match second {
                Some(expr) => FieldMatcher::build(expr, FieldKind::Second)?,
                None => FieldMatcher::any(FieldKind::Second),
            },
            minute: FieldMatcher::build(rest[0], FieldKind::Minute)?,
            hour: FieldMatcher::build(rest[1], FieldKind::Hour)?,
            day_of_month_restricted: is_restricted(&day_of_month, FieldKind::DayOfMonth),
            day_of_week_restricted: is_restricted(&day_of_week, FieldKind::DayOfWeek),
            day_of_month,
            month: FieldMatcher::build(rest[3], FieldKind::Month)?,
            day_of_week,
            year: match year {
                Some(expr) => FieldMatcher::build(expr, FieldKind::Year)?,
                None => FieldMatcher::any(FieldKind::Year),
            },
            has_second: second.is_some(),
        })
    }

    /// The normalized pattern text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether the pattern was written with a second field
    pub fn has_second_field(&self) -> bool {
        self.has_second
    }

    /// Matcher for one field
    pub fn field(&self, kind: FieldKind) -> &FieldMatcher {
        match kind {
            FieldKind::Second => &self.second,
            FieldKind::Minute => &self.minute,
            FieldKind::Hour => &self.hour,
            FieldKind::DayOfMonth => &self.day_of_month,
            FieldKind::Month => &self.month,
            FieldKind::DayOfWeek => &self.day_of_week,
            FieldKind::Year => &self.year,
        }
    }

    /// Check whether an instant matches, using its local calendar fields
    pub fn matches<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        self.matches_naive(&t.naive_local())
    }

    /// Check whether a calendar date-time matches every field
    pub fn matches_naive(&self, t: &NaiveDateTime) -> bool {
        self.second.contains(t.second()) && self.matches_from_minute(t)
    }

    /// Check a scheduler tick.
    ///
    /// With `match_second` false the second field is ignored. With it true,
    /// patterns that have no second field only fire at second 0.
    pub fn matches_tick(&self, t: &NaiveDateTime, match_second: bool) -> bool {
        let second_ok = match (match_second, self.has_second) {
            (false, _) => true,
            (true, true) => self.second.contains(t.second()),
            (true, false) => t.second() == 0,
        };
        second_ok && self.matches_from_minute(t)
    }

    fn matches_from_minute(&self, t: &NaiveDateTime) -> bool {
        let Ok(year) = u32::try_from(t.year()) else {
            return false;
        };

        self.minute.contains(t.minute())
            && self.hour.contains(t.hour())
            && self.month.contains(t.month())
            && self.year.contains(year)
            && self.matches_date(t.date())
    }

    /// Day-of-month / day-of-week combination for a single date
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        let last_day = days_in_month(date.year(), date.month());
        self.matches_day(
            date.day(),
            last_day,
            date.weekday().num_days_from_sunday(),
        )
    }

    fn matches_day(&self, day: u32, last_day: u32, weekday: u32) -> bool {
        let day_ok = || self.day_of_month.contains_day(day, last_day);
        let weekday_ok = || self.day_of_week.contains(weekday);

        match (self.day_of_month_restricted, self.day_of_week_restricted) {
            (true, true) => day_ok() || weekday_ok(),
            (true, false) => day_ok(),
            (false, true) => weekday_ok(),
            (false, false) => true,
        }
    }
}

/// A field restricts matching unless it accepts its whole domain
fn is_restricted(matcher: &FieldMatcher, kind: FieldKind) -> bool {
    !(kind.min()..=kind.max()).all(|v| matcher.contains(v))
}

/// Number of days in a month, accounting for leap years
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

impl fmt::Display for CronPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for CronPattern {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for CronPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for CronPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
