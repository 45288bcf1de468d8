// Schedule parsing and trigger evaluation
//
// Accepts five-field POSIX cron expressions (minute hour day-of-month month
// day-of-week) and the cron crate's native six/seven-field syntax with
// seconds. Five-field expressions are rewritten into the native syntax before
// parsing; day-of-week values are emitted as names because the two syntaxes
// number weekdays differently.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::collections::BTreeSet;
use std::str::FromStr;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Parse a timezone name such as "UTC" or "Africa/Johannesburg"
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Parse and validate a cron expression
pub fn parse_schedule(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let normalized = normalize_expression(expression)?;
    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Rewrite a five-field POSIX expression into seconds-precision syntax
pub fn normalize_expression(expression: &str) -> Result<String, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();

    match fields.len() {
        5 => {
            let day_of_week = translate_day_of_week(fields[4]).map_err(|reason| {
                ScheduleError::InvalidCronExpression {
                    expression: expression.to_string(),
                    reason,
                }
            })?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], day_of_week
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason: format!("expected 5, 6 or 7 fields, found {}", n),
        }),
    }
}

/// Expand a POSIX day-of-week field (0-7, names, ranges, steps) into day names
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{}'", step))?;
                if step == 0 {
                    return Err("day-of-week step cannot be 0".to_string());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (day_number(a)?, day_number(b)?)
        } else {
            let day = day_number(range)?;
            // "n/step" runs from n to the end of the week
            (day, if step > 1 { 6 } else { day })
        };

        if start > end {
            return Err(format!("day-of-week range '{}' is reversed", range));
        }

        for day in (start..=end).step_by(step) {
            days.insert(day % 7);
        }
    }

    if days.len() == 7 {
        return Ok("*".to_string());
    }

    Ok(days
        .into_iter()
        .map(|d| DAY_NAMES[d])
        .collect::<Vec<_>>()
        .join(","))
}

fn day_number(token: &str) -> Result<usize, String> {
    if let Ok(n) = token.parse::<usize>() {
        if n <= 7 {
            return Ok(n);
        }
        return Err(format!("day-of-week {} out of range 0-7", n));
    }

    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .ok_or_else(|| format!("unknown day-of-week '{}'", token))
}

/// A parsed cron trigger bound to its evaluation timezone
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedule: CronSchedule,
    timezone: Tz,
}

impl CronTrigger {
    pub fn new(expression: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        Ok(Self {
            expression: expression.to_string(),
            schedule: parse_schedule(expression)?,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First matching instant strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let after_in_tz = after.with_timezone(&self.timezone);
        self.schedule
            .after(&after_in_tz)
            .next()
            .map(|next| next.with_timezone(&Utc))
    }

    /// The next `count` matching instants after `after`
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let after_in_tz = after.with_timezone(&self.timezone);
        self.schedule
            .after(&after_in_tz)
            .take(count)
            .map(|next| next.with_timezone(&Utc))
            .collect()
    }

    /// Most recent matching instant in the half-open window (from, to]
    pub fn latest_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from_in_tz = from.with_timezone(&self.timezone);
        self.schedule
            .after(&from_in_tz)
            .map(|next| next.with_timezone(&Utc))
            .take_while(|next| *next <= to)
            .last()
    }
}

/// Remembers how far the trigger has been evaluated so each instant fires once
#[derive(Debug, Clone)]
pub struct ScheduleCursor {
    trigger: CronTrigger,
    last_checked: DateTime<Utc>,
}

impl ScheduleCursor {
    /// Start evaluating from `start`; instants at or before it never fire
    pub fn new(trigger: CronTrigger, start: DateTime<Utc>) -> Self {
        Self {
            trigger,
            last_checked: start,
        }
    }

    pub fn trigger(&self) -> &CronTrigger {
        &self.trigger
    }

    /// Return the instant to fire for, if one became due since the last poll.
    /// Several missed instants coalesce into the most recent one.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if now <= self.last_checked {
            return None;
        }

        let due = self.trigger.latest_between(self.last_checked, now);
        self.last_checked = now;
        due
    }

    /// Next instant this cursor will fire for
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.trigger.next_after(self.last_checked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, TimeZone, Timelike, Weekday};

    fn weekly() -> CronTrigger {
        CronTrigger::new("45 8 * * 4", chrono_tz::UTC).unwrap()
    }

    #[test]
    fn test_parse_valid_cron_expression() {
        assert!(parse_schedule("45 8 * * 4").is_ok());
        assert!(parse_schedule("0 45 8 * * Thu").is_ok());
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        assert!(parse_schedule("invalid").is_err());
        assert!(parse_schedule("61 8 * * 4").is_err());
        assert!(parse_schedule("45 8 * * 9").is_err());
    }

    #[test]
    fn test_normalize_translates_posix_weekdays() {
        assert_eq!(normalize_expression("45 8 * * 4").unwrap(), "0 45 8 * * Thu");
        assert_eq!(
            normalize_expression("0 9 * * 1-5").unwrap(),
            "0 0 9 * * Mon,Tue,Wed,Thu,Fri"
        );
        assert_eq!(normalize_expression("0 9 * * 0,7").unwrap(), "0 0 9 * * Sun");
        assert_eq!(normalize_expression("0 9 * * 5-7").unwrap(), "0 0 9 * * Sun,Fri,Sat");
        assert_eq!(normalize_expression("0 9 * * */2").unwrap(), "0 0 9 * * Sun,Tue,Thu,Sat");
        assert_eq!(normalize_expression("0 9 * * 0-7").unwrap(), "0 0 9 * * *");
        assert_eq!(normalize_expression("0 9 * * thu").unwrap(), "0 0 9 * * Thu");
    }

    #[test]
    fn test_seconds_precision_passes_through() {
        assert_eq!(
            normalize_expression("0 0 12 * * *").unwrap(),
            "0 0 12 * * *"
        );
    }

    #[test]
    fn test_weekly_trigger_fires_thursday_0845_utc() {
        // 2024-01-01 is a Monday
        let monday = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = weekly().next_after(monday).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 4, 8, 45, 0).unwrap());
        assert_eq!(next.weekday(), Weekday::Thu);
    }

    #[test]
    fn test_weekly_trigger_is_1045_in_utc_plus_2() {
        let monday = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = weekly().next_after(monday).unwrap();
        let local = next.with_timezone(&chrono_tz::Africa::Johannesburg);
        assert_eq!((local.hour(), local.minute()), (10, 45));
    }

    #[test]
    fn test_upcoming_is_one_week_apart() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let upcoming = weekly().upcoming(start, 3);
        assert_eq!(upcoming.len(), 3);
        assert_eq!(upcoming[1] - upcoming[0], Duration::weeks(1));
        assert_eq!(upcoming[2] - upcoming[1], Duration::weeks(1));
    }

    #[test]
    fn test_cursor_fires_once_per_instant() {
        let start = Utc.with_ymd_and_hms(2024, 1, 4, 8, 0, 0).unwrap();
        let mut cursor = ScheduleCursor::new(weekly(), start);

        assert_eq!(cursor.poll(start + Duration::minutes(30)), None);

        let fire = Utc.with_ymd_and_hms(2024, 1, 4, 8, 45, 0).unwrap();
        assert_eq!(cursor.poll(fire), Some(fire));
        assert_eq!(cursor.poll(fire), None);
        assert_eq!(cursor.poll(fire + Duration::seconds(10)), None);
    }

    #[test]
    fn test_cursor_coalesces_missed_instants() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut cursor = ScheduleCursor::new(weekly(), start);

        let much_later = Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap();
        assert_eq!(
            cursor.poll(much_later),
            Some(Utc.with_ymd_and_hms(2024, 1, 18, 8, 45, 0).unwrap())
        );
        assert_eq!(
            cursor.next_fire(),
            Some(Utc.with_ymd_and_hms(2024, 1, 25, 8, 45, 0).unwrap())
        );
    }

    #[test]
    fn test_cursor_does_not_backfill_start_instant() {
        let fire = Utc.with_ymd_and_hms(2024, 1, 4, 8, 45, 0).unwrap();
        let mut cursor = ScheduleCursor::new(weekly(), fire);
        assert_eq!(cursor.poll(fire + Duration::minutes(1)), None);
    }

    #[test]
    fn test_cursor_ignores_clock_going_backwards() {
        let start = Utc.with_ymd_and_hms(2024, 1, 4, 9, 0, 0).unwrap();
        let mut cursor = ScheduleCursor::new(weekly(), start);
        assert_eq!(cursor.poll(start - Duration::hours(1)), None);
    }

    #[test]
    fn test_parse_timezone() {
        assert!(parse_timezone("UTC").is_ok());
        assert!(parse_timezone("Africa/Johannesburg").is_ok());
        assert!(parse_timezone("Nowhere/Special").is_err());
    }
}
