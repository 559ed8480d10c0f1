//! Normalized recurrence rules and next-occurrence evaluation.
//!
//! Rules follow RRULE semantics restricted to the frequencies the
//! scheduler supports. Weeks always start on Monday and all arithmetic
//! is done in UTC. Occurrences are minute-granular: the start instant is
//! truncated to the minute before evaluation.

use chrono::{Datelike, Days, NaiveDate, TimeDelta, Weekday};
use serde::{Deserialize, Serialize};

use crate::types::{truncate_to_minute, Timestamp};

/// Upper bound on month steps examined when looking for a month that
/// contains the start day.
const MAX_MONTH_STEPS: u32 = 400;

/// Repetition unit of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

fn default_interval() -> u32 {
    1
}

/// A normalized recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub dtstart: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<Timestamp>,
    pub freq: Frequency,
    /// Repeat every `interval` units. Zero is treated as one.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Only consulted for [`Frequency::Weekly`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub byweekday: Vec<Weekday>,
}

impl RecurrenceRule {
    pub fn new(dtstart: Timestamp, freq: Frequency) -> Self {
        Self {
            dtstart,
            until: None,
            freq,
            interval: 1,
            byweekday: Vec::new(),
        }
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_weekdays(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.byweekday = days.into_iter().collect();
        self
    }

    /// Whether the rule can still produce occurrences at or after `at`.
    pub fn is_active_at(&self, at: Timestamp) -> bool {
        self.until.map_or(true, |until| until >= at)
    }

    /// Whether the rule fires exactly at the minute containing `at`.
    pub fn is_due_at(&self, at: Timestamp) -> bool {
        let minute = truncate_to_minute(at);
        self.next_on_or_after(minute) == Some(minute)
    }

    /// First occurrence at or after `at`, or `None` once the rule has
    /// ended or the next occurrence is beyond the representable range.
    pub fn next_on_or_after(&self, at: Timestamp) -> Option<Timestamp> {
        let start = truncate_to_minute(self.dtstart);
        let interval = i64::from(self.interval.max(1));
        let from = at.max(start);

        let next = match self.freq {
            Frequency::Minutely => step_fixed(start, from, TimeDelta::try_minutes(interval)?),
            Frequency::Hourly => step_fixed(start, from, TimeDelta::try_hours(interval)?),
            Frequency::Daily => step_fixed(start, from, TimeDelta::try_days(interval)?),
            Frequency::Weekly if self.byweekday.is_empty() => {
                step_fixed(start, from, TimeDelta::try_weeks(interval)?)
            }
            Frequency::Weekly => self.next_weekly(start, from, interval),
            Frequency::Monthly => next_monthly(start, from, interval),
        }?;

        match self.until {
            Some(until) if next > until => None,
            _ => Some(next),
        }
    }

    fn next_weekly(&self, start: Timestamp, from: Timestamp, interval: i64) -> Option<Timestamp> {
        let time = start.time();
        let week0 = monday_of(start.date_naive())?;

        let mut days: Vec<u32> = self
            .byweekday
            .iter()
            .map(|d| d.num_days_from_monday())
            .collect();
        days.sort_unstable();
        days.dedup();

        let weeks_since = (monday_of(from.date_naive())? - week0).num_days() / 7;
        let rem = weeks_since % interval;
        let mut week = if rem == 0 {
            weeks_since
        } else {
            weeks_since + interval - rem
        };

        // Either the current eligible week still has a slot, or the first
        // slot of the following eligible week is the answer.
        for _ in 0..2 {
            let monday = week0.checked_add_signed(TimeDelta::try_weeks(week)?)?;
            for day in &days {
                let date = monday.checked_add_days(Days::new(u64::from(*day)))?;
                let candidate = date.and_time(time).and_utc();
                if candidate >= from {
                    return Some(candidate);
                }
            }
            week = week.checked_add(interval)?;
        }
        None
    }
}

/// Smallest `start + k * step` (k >= 0) that is not before `from`.
fn step_fixed(start: Timestamp, from: Timestamp, step: TimeDelta) -> Option<Timestamp> {
    let elapsed = (from - start).num_milliseconds().max(0);
    let step_ms = step.num_milliseconds().max(1);
    let k = elapsed.checked_add(step_ms - 1)? / step_ms;
    let offset = TimeDelta::try_milliseconds(k.checked_mul(step_ms)?)?;
    start.checked_add_signed(offset)
}

fn monday_of(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
}

/// Monthly occurrences keep the start day; months without that day are
/// skipped.
fn next_monthly(start: Timestamp, from: Timestamp, interval: i64) -> Option<Timestamp> {
    let day = start.day();
    let time = start.time();

    let months_between = i64::from(from.year() - start.year()) * 12 + i64::from(from.month())
        - i64::from(start.month());
    let mut offset = (months_between.max(0) / interval).checked_mul(interval)?;

    for _ in 0..MAX_MONTH_STEPS {
        let total = i64::from(start.month0()).checked_add(offset)?;
        let year = i32::try_from(i64::from(start.year()) + total.div_euclid(12)).ok()?;
        let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;

        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            let candidate = date.and_time(time).and_utc();
            if candidate >= from {
                return Some(candidate);
            }
        }
        offset = offset.checked_add(interval)?;
    }
    None
}
