//! Pattern fields and single-token value parsing

use crate::error::{CronError, Result};
use std::fmt;

/// Internal day-of-month value standing for "the last day of the month" (`L`)
pub const LAST_DAY_OF_MONTH: u32 = 32;

const MONTH_ALIASES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const WEEKDAY_ALIASES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// One component of a time pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
    Year,
}

impl FieldKind {
    /// Smallest value of the field's domain
    pub const fn min(self) -> u32 {
        match self {
            FieldKind::Second | FieldKind::Minute | FieldKind::Hour | FieldKind::DayOfWeek => 0,
            FieldKind::DayOfMonth | FieldKind::Month => 1,
            FieldKind::Year => 1970,
        }
    }

    /// Largest value of the field's domain (day-of-week after folding 7 to 0)
    pub const fn max(self) -> u32 {
        match self {
            FieldKind::Second | FieldKind::Minute => 59,
            FieldKind::Hour => 23,
            FieldKind::DayOfMonth => 31,
            FieldKind::Month => 12,
            FieldKind::DayOfWeek => 6,
            FieldKind::Year => 2099,
        }
    }

    /// Human-readable field name used in error messages
    pub const fn name(self) -> &'static str {
        match self {
            FieldKind::Second => "second",
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day of month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day of week",
            FieldKind::Year => "year",
        }
    }

    /// Parse a single token (no `,`, `-` or `/`) into a field value.
    ///
    /// Numbers must lie within the field's domain. Months accept `jan`..`dec`,
    /// days of week accept `sun`..`sat` and both `0` and `7` for Sunday, all
    /// case-insensitive. Day-of-month accepts `L`, returned as
    /// [`LAST_DAY_OF_MONTH`].
    pub fn parse_value(self, token: &str) -> Result<u32> {
        let token = token.trim();

        if token.is_empty() {
            return Err(self.syntax_error(token));
        }

        if self == FieldKind::DayOfMonth && token.eq_ignore_ascii_case("l") {
            return Ok(LAST_DAY_OF_MONTH);
        }

        if token.bytes().all(|b| b.is_ascii_digit()) {
            let value: u32 = token.parse().map_err(|_| self.out_of_range(u32::MAX))?;
            return self.check_range(value);
        }

        let aliases: &[&str] = match self {
            FieldKind::Month => &MONTH_ALIASES,
            FieldKind::DayOfWeek => &WEEKDAY_ALIASES,
            _ => &[],
        };

        aliases
            .iter()
            .position(|alias| alias.eq_ignore_ascii_case(token))
            .map(|idx| match self {
                FieldKind::Month => idx as u32 + 1,
                _ => idx as u32,
            })
            .ok_or_else(|| self.syntax_error(token))
    }

    fn check_range(self, value: u32) -> Result<u32> {
        if self == FieldKind::DayOfWeek && value == 7 {
            return Ok(0);
        }
        if value < self.min() || value > self.max() {
            return Err(self.out_of_range(value));
        }
        Ok(value)
    }

    pub(crate) fn syntax_error(self, token: &str) -> CronError {
        CronError::InvalidFieldSyntax {
            field: self,
            token: token.to_string(),
        }
    }

    fn out_of_range(self, value: u32) -> CronError {
        CronError::OutOfRange {
            field: self,
            value,
            min: self.min(),
            max: self.max(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
