//! Six-field cron triggers
//!
//! Field order: `second minute hour day-of-month month day-of-week`.
//! Each field accepts `*`, single values, ranges (`a-b`), steps (`*/n`,
//! `a/n`, `a-b/n`) and comma-separated lists of those. Months accept `JAN`..`DEC`
//! and weekdays `MON`..`SUN` (0 = Monday). `?` in the day-of-month field (or,
//! failing that, the day-of-week field) is an alias for `*`.

use crate::error::CronError;
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};
use std::fmt;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// How far ahead `next_after` searches before giving up (covers leap days)
const MAX_LOOKAHEAD_DAYS: i64 = 366 * 5;

/// A parsed, normalised cron trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronTrigger {
    /// Normalised source fields, in cron order
    fields: [String; 6],
    seconds: Vec<u32>,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days: Vec<u32>,
    months: Vec<u32>,
    weekdays: Vec<u32>,
}

impl CronTrigger {
    /// Parse a six-field cron expression
    ///
    /// Fields are separated by single spaces. Only one `?` is rewritten: the
    /// day-of-month field when it is `?`, otherwise the day-of-week field.
    ///
    /// # Errors
    ///
    /// Returns `CronError::InvalidCronExpression` if the expression does not
    /// have exactly six fields or any field is malformed.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let mut segments: Vec<String> = expression
            .split(' ')
            .map(str::to_string)
            .collect();
        if segments.len() != 6 {
            return Err(CronError::InvalidCronExpression(format!(
                "expected 6 fields (second minute hour day month day_of_week), got {}",
                segments.len()
            )));
        }

        if segments[3] == "?" {
            segments[3] = "*".to_string();
        } else if segments[5] == "?" {
            segments[5] = "*".to_string();
        }

        let seconds = parse_field(&segments[0], "second", 0, 59, None)?;
        let minutes = parse_field(&segments[1], "minute", 0, 59, None)?;
        let hours = parse_field(&segments[2], "hour", 0, 23, None)?;
        let days = parse_field(&segments[3], "day", 1, 31, None)?;
        let months = parse_field(&segments[4], "month", 1, 12, Some((&MONTH_NAMES[..], 1)))?;
        let weekdays = parse_field(
            &segments[5],
            "day_of_week",
            0,
            6,
            Some((&WEEKDAY_NAMES[..], 0)),
        )?;

        let fields: [String; 6] = [
            segments[0].clone(),
            segments[1].clone(),
            segments[2].clone(),
            segments[3].clone(),
            segments[4].clone(),
            segments[5].clone(),
        ];

        Ok(Self {
            fields,
            seconds,
            minutes,
            hours,
            days,
            months,
            weekdays,
        })
    }

    pub fn second(&self) -> &str {
        &self.fields[0]
    }

    pub fn minute(&self) -> &str {
        &self.fields[1]
    }

    pub fn hour(&self) -> &str {
        &self.fields[2]
    }

    pub fn day_of_month(&self) -> &str {
        &self.fields[3]
    }

    pub fn month(&self) -> &str {
        &self.fields[4]
    }

    pub fn day_of_week(&self) -> &str {
        &self.fields[5]
    }

    /// Check whether a wall-clock time matches every field
    pub fn matches(&self, time: &NaiveDateTime) -> bool {
        self.date_matches(time)
            && self.hours.contains(&time.hour())
            && self.minutes.contains(&time.minute())
            && self.seconds.contains(&time.second())
    }

    /// Compute the first matching wall-clock time strictly after `after`
    ///
    /// Returns `None` if nothing matches within the next five years
    /// (e.g. `0 0 0 31 2 *`).
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let start = after.with_nanosecond(0)? + Duration::seconds(1);

        for offset in 0..MAX_LOOKAHEAD_DAYS {
            let date = start.date() + Duration::days(offset);
            let day = date.and_time(NaiveTime::MIN);
            if !self.date_matches(&day) {
                continue;
            }

            let floor = if offset == 0 { start.time() } else { NaiveTime::MIN };
            if let Some(time) = self.first_time_from(floor) {
                return Some(date.and_time(time));
            }
        }

        None
    }

    fn date_matches(&self, time: &NaiveDateTime) -> bool {
        self.months.contains(&time.month())
            && self.days.contains(&time.day())
            && self
                .weekdays
                .contains(&time.weekday().num_days_from_monday())
    }

    /// Earliest time of day at or after `floor` matching hour/minute/second
    fn first_time_from(&self, floor: NaiveTime) -> Option<NaiveTime> {
        for &hour in self.hours.iter().filter(|&&h| h >= floor.hour()) {
            let same_hour = hour == floor.hour();
            for &minute in self
                .minutes
                .iter()
                .filter(|&&m| !same_hour || m >= floor.minute())
            {
                let same_minute = same_hour && minute == floor.minute();
                if let Some(&second) = self
                    .seconds
                    .iter()
                    .find(|&&s| !same_minute || s >= floor.second())
                {
                    return NaiveTime::from_hms_opt(hour, minute, second);
                }
            }
        }
        None
    }
}

impl fmt::Display for CronTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(" "))
    }
}

/// Parse one cron field into the sorted set of values it allows
fn parse_field(
    field: &str,
    name: &str,
    min: u32,
    max: u32,
    names: Option<(&[&str], u32)>,
) -> Result<Vec<u32>, CronError> {
    let invalid = |reason: String| {
        CronError::InvalidCronExpression(format!("{} field '{}': {}", name, field, reason))
    };

    let mut values = Vec::new();
    for item in field.split(',') {
        if item.is_empty() {
            return Err(invalid("empty list item".to_string()));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("invalid step '{}'", step)))?;
                if step == 0 {
                    return Err(invalid("step must be positive".to_string()));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((start, end)) = range.split_once('-') {
            (
                parse_value(start, min, max, names).map_err(&invalid)?,
                parse_value(end, min, max, names).map_err(&invalid)?,
            )
        } else {
            let value = parse_value(range, min, max, names).map_err(&invalid)?;
            // `a/n` runs from a to the end of the field's range
            (value, if step.is_some() { max } else { value })
        };

        if start > end {
            return Err(invalid(format!("range {}-{} is reversed", start, end)));
        }

        values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    }

    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn parse_value(
    token: &str,
    min: u32,
    max: u32,
    names: Option<(&[&str], u32)>,
) -> Result<u32, String> {
    if let Some((names, first)) = names {
        let lower = token.to_ascii_lowercase();
        if let Some(index) = names.iter().position(|n| *n == lower) {
            return Ok(first + index as u32);
        }
    }

    let value: u32 = token
        .parse()
        .map_err(|_| format!("invalid value '{}'", token))?;
    if value < min || value > max {
        return Err(format!("value {} out of range {}-{}", value, min, max));
    }
    Ok(value)
}
