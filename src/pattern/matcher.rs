//! Per-field value matchers
//!
//! Field expressions follow the usual cron grammar:
//!
//! ```text
//! expr  := "*" | "?" | list
//! list  := range ("," range)*
//! range := value | bound "-" bound | (value | "*" | bound "-" bound) "/" step
//! ```
//!
//! Second, minute, hour, month and day-of-week expand into a [`BoundedMatcher`]
//! (a 64-bit presence mask). Day-of-month and year expand into a
//! [`SparseMatcher`] holding the sorted values, which keeps the `L` marker for
//! day-of-month and avoids a huge vector for years.

use super::field::{FieldKind, LAST_DAY_OF_MONTH};
use crate::error::{CronError, Result};

/// Set of acceptable values for one pattern field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMatcher {
    Bounded(BoundedMatcher),
    Sparse(SparseMatcher),
}

impl FieldMatcher {
    /// Expand a field expression into a matcher for `kind`
    pub fn build(expression: &str, kind: FieldKind) -> Result<Self> {
        let expression = expression.trim();

        let values = match expression {
            "*" => (kind.min()..=kind.max()).collect(),
            "?" if matches!(kind, FieldKind::DayOfMonth | FieldKind::DayOfWeek) => {
                (kind.min()..=kind.max()).collect()
            }
            _ => expand_list(expression, kind)?,
        };

        Self::from_values(kind, values)
    }

    /// Matcher accepting the whole domain of `kind`
    pub fn any(kind: FieldKind) -> Self {
        Self::for_kind(kind, (kind.min()..=kind.max()).collect())
    }

    /// Matcher accepting exactly the given values
    pub fn from_values(kind: FieldKind, values: Vec<u32>) -> Result<Self> {
        if values.is_empty() {
            return Err(CronError::EmptyField { field: kind });
        }
        Ok(Self::for_kind(kind, values))
    }

    fn for_kind(kind: FieldKind, values: Vec<u32>) -> Self {
        match kind {
            FieldKind::DayOfMonth | FieldKind::Year => {
                FieldMatcher::Sparse(SparseMatcher::new(values))
            }
            _ => FieldMatcher::Bounded(BoundedMatcher::new(kind.min(), kind.max(), &values)),
        }
    }

    /// Whether `value` is accepted
    pub fn contains(&self, value: u32) -> bool {
        match self {
            FieldMatcher::Bounded(m) => m.contains(value),
            FieldMatcher::Sparse(m) => m.contains(value),
        }
    }

    /// Smallest accepted value `>= value`, or `None` once the cycle is exhausted
    pub fn next_at_or_after(&self, value: u32) -> Option<u32> {
        match self {
            FieldMatcher::Bounded(m) => m.next_at_or_after(value),
            FieldMatcher::Sparse(m) => m.next_at_or_after(value),
        }
    }

    /// Day-of-month check that resolves the `L` marker against `last_day`
    pub fn contains_day(&self, day: u32, last_day: u32) -> bool {
        match self {
            FieldMatcher::Sparse(m) => m.contains_day(day, last_day),
            FieldMatcher::Bounded(m) => day <= last_day && m.contains(day),
        }
    }

    /// Accepted values in ascending order
    pub fn values(&self) -> Vec<u32> {
        match self {
            FieldMatcher::Bounded(m) => m.values().collect(),
            FieldMatcher::Sparse(m) => m.values.clone(),
        }
    }
}

/// Presence mask over a domain of at most 64 values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedMatcher {
    min: u32,
    max: u32,
    mask: u64,
}

impl BoundedMatcher {
    fn new(min: u32, max: u32, values: &[u32]) -> Self {
        let mask = values
            .iter()
            .filter(|&&v| v >= min && v <= max)
            .fold(0u64, |mask, &v| mask | (1u64 << (v - min)));
        Self { min, max, mask }
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max && self.mask & (1u64 << (value - self.min)) != 0
    }

    pub fn next_at_or_after(&self, value: u32) -> Option<u32> {
        if value > self.max {
            return None;
        }
        let start = value.max(self.min);
        let remaining = self.mask >> (start - self.min);
        if remaining == 0 {
            None
        } else {
            Some(start + remaining.trailing_zeros())
        }
    }

    fn values(&self) -> impl Iterator<Item = u32> + '_ {
        (self.min..=self.max).filter(move |&v| self.contains(v))
    }
}

/// Explicit sorted list of values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseMatcher {
    values: Vec<u32>,
}

impl SparseMatcher {
    fn new(mut values: Vec<u32>) -> Self {
        values.sort_unstable();
        values.dedup();
        Self { values }
    }

    pub fn contains(&self, value: u32) -> bool {
        self.values.binary_search(&value).is_ok()
    }

    pub fn next_at_or_after(&self, value: u32) -> Option<u32> {
        let idx = self.values.partition_point(|&v| v < value);
        self.values.get(idx).copied()
    }

    fn contains_day(&self, day: u32, last_day: u32) -> bool {
        if day > last_day {
            return false;
        }
        self.contains(day) || (day == last_day && self.contains(LAST_DAY_OF_MONTH))
    }

    /// Next matching day in a month that has `last_day` days
    pub fn next_day_at_or_after(&self, day: u32, last_day: u32) -> Option<u32> {
        self.values
            .iter()
            .map(|&v| if v == LAST_DAY_OF_MONTH { last_day } else { v })
            .filter(|&v| v >= day && v <= last_day)
            .min()
    }
}

fn expand_list(expression: &str, kind: FieldKind) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    for part in expression.split(',') {
        if part.trim().is_empty() {
            return Err(kind.syntax_error(expression));
        }
        values.extend(expand_range(part.trim(), kind)?);
    }
    Ok(values)
}

fn expand_range(part: &str, kind: FieldKind) -> Result<Vec<u32>> {
    let (range_part, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: usize = step
                .trim()
                .parse()
                .map_err(|_| kind.syntax_error(part))?;
            if step == 0 {
                return Err(kind.syntax_error(part));
            }
            (range.trim(), Some(step))
        }
        None => (part, None),
    };

    let sequence: Vec<u32> = if range_part == "*" {
        (kind.min()..=kind.max()).collect()
    } else if let Some((start, end)) = range_part.split_once('-') {
        let start_token = start.trim();
        let start = kind.parse_value(start_token)?;
        let end_token = end.trim();
        let end = kind.parse_value(end_token)?;
        if start == LAST_DAY_OF_MONTH && kind == FieldKind::DayOfMonth {
            return Err(kind.syntax_error(part));
        }
        let sunday_end = kind == FieldKind::DayOfWeek
            && end_token.parse::<u32>() == Ok(7)
            && start_token.parse::<u32>() != Ok(7);
        if sunday_end {
            // Sunday as the upper bound closes the week: start..=SAT, SUN
            (start..=kind.max()).chain(std::iter::once(0)).collect()
        } else if start <= end {
            (start..=end).collect()
        } else {
            // Wraparound: a..max then min..b
            (start..=kind.max()).chain(kind.min()..=end).collect()
        }
    } else {
        let value = kind.parse_value(range_part)?;
        match step {
            Some(_) if value == LAST_DAY_OF_MONTH && kind == FieldKind::DayOfMonth => {
                return Err(kind.syntax_error(part));
            }
            Some(_) => (value..=kind.max()).collect(),
            None => vec![value],
        }
    };

    Ok(match step {
        Some(step) => sequence.into_iter().step_by(step).collect(),
        None => sequence,
    })
}
