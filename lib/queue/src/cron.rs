//! Cron evaluation for repeating jobs.
//!
//! Accepts standard 5-field Unix cron expressions (minute, hour,
//! day-of-month, month, day-of-week) and converts them to the 6-field form
//! (with seconds) the `cron` crate expects. Unix numbers weekdays 0-7 from
//! Sunday while the `cron` crate numbers them 1-7, so numeric weekdays are
//! rewritten as names. Timezones are UTC aliases, fixed offsets or IANA
//! names.

use crate::error::QueueError;
use crate::job::ScheduleOptions;
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use rootcause::prelude::Report;
use std::str::FromStr;

const UTC_ALIASES: [&str; 4] = ["UTC", "ETC/UTC", "GMT", "Z"];

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Converts a 5-field Unix expression to the `cron` crate's 6-field form.
///
/// Expressions with any other field count are passed through unchanged.
fn normalize_cron_expr(cron_expr: &str) -> Result<String, String> {
    let trimmed = cron_expr.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Ok(trimmed.to_string());
    }
    let day_of_week = unix_day_of_week(fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {day_of_week}",
        fields[0], fields[1], fields[2], fields[3]
    ))
}

/// Rewrites numeric Unix weekdays (0 and 7 are Sunday) as day names.
fn unix_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days: Vec<&str> = Vec::new();
    let mut named: Vec<&str> = Vec::new();

    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            named.push(item);
            continue;
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step in '{item}'"))?;
                if step == 0 {
                    return Err(format!("zero day-of-week step in '{item}'"));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (first, last) = if range == "*" {
            (0, 6)
        } else if let Some((from, to)) = range.split_once('-') {
            (parse_weekday(from, item)?, parse_weekday(to, item)?)
        } else {
            let day = parse_weekday(range, item)?;
            (day, if step.is_some() { 6 } else { day })
        };
        if first > last {
            return Err(format!("descending day-of-week range '{item}'"));
        }

        for day in (first..=last).step_by(step.unwrap_or(1)) {
            let name = WEEKDAYS[day % 7];
            if !days.contains(&name) {
                days.push(name);
            }
        }
    }

    days.extend(named);
    Ok(days.join(","))
}

fn parse_weekday(text: &str, item: &str) -> Result<usize, String> {
    match text.parse::<usize>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("day-of-week out of range in '{item}'")),
    }
}

/// Where occurrences are evaluated.
#[derive(Debug, Clone, Copy)]
enum Zone {
    Fixed(FixedOffset),
    Named(Tz),
}

fn parse_timezone(timezone: &str) -> Result<Zone, Report<QueueError>> {
    let trimmed = timezone.trim();
    if UTC_ALIASES.contains(&trimmed.to_ascii_uppercase().as_str()) {
        return Ok(Zone::Fixed(Utc.fix()));
    }
    if let Ok(offset) = FixedOffset::from_str(trimmed) {
        return Ok(Zone::Fixed(offset));
    }
    Tz::from_str(trimmed).map(Zone::Named).map_err(|_| {
        QueueError::InvalidTimezone {
            timezone: timezone.to_string(),
        }
        .into()
    })
}

fn first_after<Z: TimeZone>(schedule: &Schedule, after: &DateTime<Z>) -> Option<DateTime<Utc>> {
    schedule
        .after(after)
        .next()
        .map(|at| at.with_timezone(&Utc))
}

/// A parsed cron schedule bound to a timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
    zone: Zone,
}

impl CronSchedule {
    /// Parses an expression and timezone.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidCronExpression`] or
    /// [`QueueError::InvalidTimezone`].
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, Report<QueueError>> {
        let zone = parse_timezone(timezone)?;
        let invalid = |reason: String| QueueError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };
        let normalized = normalize_cron_expr(expression).map_err(invalid)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            zone,
        })
    }

    /// Parses the cron and timezone of a repeating job.
    ///
    /// # Errors
    ///
    /// See [`CronSchedule::parse`].
    pub fn from_options(options: &ScheduleOptions) -> Result<Self, Report<QueueError>> {
        Self::parse(&options.cron_expression, &options.timezone)
    }

    /// The expression as given, before normalization.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The first occurrence strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.zone {
            Zone::Fixed(offset) => first_after(&self.schedule, &after.with_timezone(&offset)),
            Zone::Named(tz) => first_after(&self.schedule, &after.with_timezone(&tz)),
        }
    }

    /// Like [`CronSchedule::next_after`], failing when the schedule is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NoUpcomingOccurrence`].
    pub fn require_next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, Report<QueueError>> {
        self.next_after(after).ok_or_else(|| {
            QueueError::NoUpcomingOccurrence {
                expression: self.expression.clone(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Weekday};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, h, m, s).unwrap()
    }

    fn weekdays(expression: &str, from: DateTime<Utc>, count: usize) -> Vec<Weekday> {
        let schedule = CronSchedule::parse(expression, "UTC").unwrap();
        let mut after = from;
        let mut days = Vec::new();
        for _ in 0..count {
            after = schedule.next_after(after).unwrap();
            days.push(after.weekday());
        }
        days
    }

    #[test]
    fn normalizes_five_fields_only() {
        assert_eq!(normalize_cron_expr("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_cron_expr(" 0 0 * * * * ").unwrap(), "0 0 * * * *");
    }

    #[test]
    fn numeric_weekdays_become_names() {
        assert_eq!(unix_day_of_week("0").unwrap(), "SUN");
        assert_eq!(unix_day_of_week("7").unwrap(), "SUN");
        assert_eq!(unix_day_of_week("1-5").unwrap(), "MON,TUE,WED,THU,FRI");
        assert_eq!(unix_day_of_week("5-7").unwrap(), "FRI,SAT,SUN");
        assert_eq!(unix_day_of_week("*/2").unwrap(), "SUN,TUE,THU,SAT");
        assert_eq!(unix_day_of_week("0,7").unwrap(), "SUN");
        assert_eq!(unix_day_of_week("MON-FRI").unwrap(), "MON-FRI");
        assert!(unix_day_of_week("8").is_err());
        assert!(unix_day_of_week("5-1").is_err());
    }

    #[test]
    fn sunday_is_zero() {
        // 2030-01-01 is a Tuesday.
        let schedule = CronSchedule::parse("0 9 * * 0", "UTC").unwrap();
        let next = schedule.next_after(at(0, 0, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2030, 1, 6, 9, 0, 0).unwrap());
        assert_eq!(weekdays("* * * * 0", at(0, 0, 0), 1), vec![Weekday::Sun]);
    }

    #[test]
    fn seven_is_also_sunday() {
        assert_eq!(weekdays("* * * * 7", at(0, 0, 0), 1), vec![Weekday::Sun]);
    }

    #[test]
    fn monday_is_one() {
        let schedule = CronSchedule::parse("0 9 * * 1", "UTC").unwrap();
        let next = schedule.next_after(at(0, 0, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekday_range_covers_monday_to_friday() {
        assert_eq!(
            weekdays("0 9 * * 1-5", at(0, 0, 0), 7),
            vec![
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
            ]
        );
    }

    #[test]
    fn every_five_minutes() {
        let schedule = CronSchedule::parse("*/5 * * * *", "UTC").unwrap();
        assert_eq!(schedule.next_after(at(10, 2, 0)), Some(at(10, 5, 0)));
        assert_eq!(schedule.next_after(at(10, 5, 0)), Some(at(10, 10, 0)));
    }

    #[test]
    fn every_twelve_hours() {
        let schedule = CronSchedule::parse("0 */12 * * *", "Etc/UTC").unwrap();
        assert_eq!(schedule.next_after(at(1, 0, 0)), Some(at(12, 0, 0)));
    }

    #[test]
    fn fixed_offset_shifts_occurrences() {
        let schedule = CronSchedule::parse("0 9 * * *", "+02:00").unwrap();
        let next = schedule.next_after(at(0, 0, 0)).unwrap();
        assert_eq!(next.hour(), 7);
    }

    #[test]
    fn utc_aliases_are_accepted() {
        for tz in ["UTC", "utc", "Etc/UTC", "GMT", "Z"] {
            assert!(CronSchedule::parse("* * * * *", tz).is_ok(), "{tz}");
        }
    }

    #[test]
    fn named_zone_follows_daylight_saving() {
        // New York switches to EDT on 2030-03-10.
        let schedule = CronSchedule::parse("0 9 * * *", "America/New_York").unwrap();

        let before = Utc.with_ymd_and_hms(2030, 3, 8, 12, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(before),
            Some(Utc.with_ymd_and_hms(2030, 3, 8, 14, 0, 0).unwrap())
        );

        let across = Utc.with_ymd_and_hms(2030, 3, 9, 15, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(across),
            Some(Utc.with_ymd_and_hms(2030, 3, 10, 13, 0, 0).unwrap())
        );
    }

    #[test]
    fn unknown_zones_are_rejected() {
        let err = CronSchedule::parse("* * * * *", "Mars/Olympus_Mons").unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus_Mons"));
    }

    #[test]
    fn garbage_cron_is_rejected() {
        let err = CronSchedule::parse("every minute please", "UTC").unwrap_err();
        assert!(err.to_string().contains("every minute please"));
    }

    #[test]
    fn out_of_range_weekday_is_rejected() {
        let err = CronSchedule::parse("0 9 * * 9", "UTC").unwrap_err();
        assert!(err.to_string().contains("0 9 * * 9"));
    }
}
