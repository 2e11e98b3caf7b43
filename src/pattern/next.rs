//! Next-match search
//!
//! Walks the calendar field by field, jumping each field straight to the
//! next value its matcher accepts and carrying into the next larger field
//! on exhaustion. The cost depends on how many field combinations are
//! tried, not on how many seconds lie between matches.

use super::{days_in_month, CronPattern};
use crate::error::{CronError, Result};
use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike,
};

/// Upper bound on carry iterations for a single search
pub const MAX_SEARCH_ITERATIONS: usize = 4096;

/// Mutable calendar position used during the search
#[derive(Debug, Clone, Copy)]
struct Cursor {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl Cursor {
    fn new(t: &NaiveDateTime) -> Self {
        Self {
            year: t.year(),
            month: t.month(),
            day: t.day(),
            hour: t.hour(),
            minute: t.minute(),
            second: t.second(),
        }
    }

    fn reset_day(&mut self) {
        self.day = 1;
        self.reset_hour();
    }

    fn reset_hour(&mut self) {
        self.hour = 0;
        self.reset_minute();
    }

    fn reset_minute(&mut self) {
        self.minute = 0;
        self.second = 0;
    }

    fn carry_year(&mut self) {
        self.year += 1;
        self.month = 1;
        self.reset_day();
    }

    fn carry_month(&mut self) {
        if self.month >= 12 {
            self.carry_year();
        } else {
            self.month += 1;
            self.reset_day();
        }
    }

    fn carry_day(&mut self) {
        if self.day >= days_in_month(self.year, self.month) {
            self.carry_month();
        } else {
            self.day += 1;
            self.reset_hour();
        }
    }

    fn carry_hour(&mut self) {
        if self.hour >= 23 {
            self.carry_day();
        } else {
            self.hour += 1;
            self.reset_minute();
        }
    }

    fn carry_minute(&mut self) {
        if self.minute >= 59 {
            self.carry_hour();
        } else {
            self.minute += 1;
            self.second = 0;
        }
    }

    fn to_naive(self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_opt(
            self.hour,
            self.minute,
            self.second,
        )
    }
}

impl CronPattern {
    /// Compute the next `count` matching instants starting at `from`.
    ///
    /// With `strict` false, `from` itself is returned first if it matches.
    /// Local times that do not exist in `from`'s time zone are skipped and
    /// ambiguous ones resolve to the earliest mapping.
    ///
    /// # Examples
    ///
    /// ```
    /// use a3s_cron::CronPattern;
    /// use chrono::{TimeZone, Utc};
    ///
    /// let pattern = CronPattern::parse("0 0 9 * * MON-FRI").unwrap();
    /// let from = Utc.with_ymd_and_hms(2026, 1, 2, 10, 0, 0).unwrap(); // Friday
    /// let next = pattern.next_matches(&from, 2, true).unwrap();
    /// assert_eq!(next[0], Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap());
    /// assert_eq!(next[1], Utc.with_ymd_and_hms(2026, 1, 6, 9, 0, 0).unwrap());
    /// ```
    pub fn next_matches<Tz: TimeZone>(
        &self,
        from: &DateTime<Tz>,
        count: usize,
        strict: bool,
    ) -> Result<Vec<DateTime<Tz>>> {
        self.search(from, count, strict, true)
    }

    /// Next `count` scheduler ticks strictly after `from` at which this
    /// pattern fires.
    ///
    /// Follows [`CronPattern::matches_tick`]: with `match_second` false the
    /// second field is ignored and every result falls on second 0.
    ///
    /// ```
    /// use a3s_cron::CronPattern;
    /// use chrono::{TimeZone, Timelike, Utc};
    ///
    /// let pattern = CronPattern::parse("30 * * * * *").unwrap();
    /// let from = Utc.with_ymd_and_hms(2026, 1, 2, 10, 0, 0).unwrap();
    /// let ticks = pattern.next_ticks(&from, 2, false).unwrap();
    /// assert_eq!(ticks[0], Utc.with_ymd_and_hms(2026, 1, 2, 10, 1, 0).unwrap());
    /// assert_eq!(ticks[1].second(), 0);
    /// ```
    pub fn next_ticks<Tz: TimeZone>(
        &self,
        from: &DateTime<Tz>,
        count: usize,
        match_second: bool,
    ) -> Result<Vec<DateTime<Tz>>> {
        self.search(from, count, true, match_second)
    }

    fn search<Tz: TimeZone>(
        &self,
        from: &DateTime<Tz>,
        count: usize,
        strict: bool,
        honour_second: bool,
    ) -> Result<Vec<DateTime<Tz>>> {
        let tz = from.timezone();
        let mut cursor = search_start(from.naive_local(), strict);
        let mut results = Vec::with_capacity(count);
        let mut skipped = 0usize;

        while results.len() < count {
            let local = self.find_next(cursor, honour_second)?;
            cursor = local + Duration::seconds(1);

            let resolved = match tz.from_local_datetime(&local) {
                LocalResult::Single(dt) => Some(dt),
                LocalResult::Ambiguous(earliest, _) => Some(earliest),
                LocalResult::None => None,
            };

            match resolved {
                Some(dt) if dt > *from || (!strict && dt == *from) => results.push(dt),
                _ => {
                    skipped += 1;
                    if skipped > MAX_SEARCH_ITERATIONS {
                        return Err(self.no_match());
                    }
                }
            }
        }

        Ok(results)
    }

    /// First matching instant strictly after `after`
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Result<DateTime<Tz>> {
        self.next_matches(after, 1, true)?
            .pop()
            .ok_or_else(|| self.no_match())
    }

    /// Time-zone free variant of [`CronPattern::next_matches`]
    pub fn next_matches_naive(
        &self,
        from: NaiveDateTime,
        count: usize,
        strict: bool,
    ) -> Result<Vec<NaiveDateTime>> {
        let mut cursor = search_start(from, strict);
        let mut results = Vec::with_capacity(count);
        while results.len() < count {
            let next = self.find_next(cursor, true)?;
            results.push(next);
            cursor = next + Duration::seconds(1);
        }
        Ok(results)
    }

    /// Earliest matching local time at or after `start` (whole seconds).
    ///
    /// Without `honour_second` the second field is treated as `0`.
    fn find_next(&self, start: NaiveDateTime, honour_second: bool) -> Result<NaiveDateTime> {
        let mut c = Cursor::new(&start);

        for _ in 0..MAX_SEARCH_ITERATIONS {
            let year = u32::try_from(c.year).unwrap_or(0);
            match self.year.next_at_or_after(year) {
                None => break,
                Some(y) if y != year => {
                    c.year = y as i32;
                    c.month = 1;
                    c.reset_day();
                }
                Some(_) => {}
            }

            match self.month.next_at_or_after(c.month) {
                None => {
                    c.carry_year();
                    continue;
                }
                Some(m) if m != c.month => {
                    c.month = m;
                    c.reset_day();
                }
                Some(_) => {}
            }

            match self.next_day_at_or_after(c.year, c.month, c.day) {
                None => {
                    c.carry_month();
                    continue;
                }
                Some(d) if d != c.day => {
                    c.day = d;
                    c.reset_hour();
                }
                Some(_) => {}
            }

            match self.hour.next_at_or_after(c.hour) {
                None => {
                    c.carry_day();
                    continue;
                }
                Some(h) if h != c.hour => {
                    c.hour = h;
                    c.reset_minute();
                }
                Some(_) => {}
            }

            match self.minute.next_at_or_after(c.minute) {
                None => {
                    c.carry_hour();
                    continue;
                }
                Some(m) if m != c.minute => {
                    c.minute = m;
                    c.second = 0;
                }
                Some(_) => {}
            }

            match self.next_second_at_or_after(c.second, honour_second) {
                None => {
                    c.carry_minute();
                    continue;
                }
                Some(s) => c.second = s,
            }

            return c.to_naive().ok_or_else(|| self.no_match());
        }

        Err(self.no_match())
    }

    /// Patterns without a second field fire at second 0
    fn next_second_at_or_after(&self, second: u32, honour_second: bool) -> Option<u32> {
        if self.has_second && honour_second {
            self.second.next_at_or_after(second)
        } else if second == 0 {
            Some(0)
        } else {
            None
        }
    }

    fn next_day_at_or_after(&self, year: i32, month: u32, day: u32) -> Option<u32> {
        let last_day = days_in_month(year, month);
        let first_weekday = NaiveDate::from_ymd_opt(year, month, 1)?
            .weekday()
            .num_days_from_sunday();

        (day..=last_day).find(|&d| self.matches_day(d, last_day, (first_weekday + d - 1) % 7))
    }

    fn no_match(&self) -> CronError {
        CronError::NoMatchFound {
            pattern: self.text.clone(),
            iterations: MAX_SEARCH_ITERATIONS,
        }
    }
}

/// First whole second to consider
fn search_start(from: NaiveDateTime, strict: bool) -> NaiveDateTime {
    let truncated = from.with_nanosecond(0).unwrap_or(from);
    if truncated < from || strict {
        truncated + Duration::seconds(1)
    } else {
        truncated
    }
}
