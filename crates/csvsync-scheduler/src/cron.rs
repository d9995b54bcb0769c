//! 5-field cron expressions on top of the `cron` crate.
//!
//! Expressions are written `MIN HOUR DOM MON DOW` and evaluated in the
//! scheduler's timezone. The crate wants seconds and years and numbers
//! weekdays 1-7 from Sunday, so expressions are rewritten before parsing.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Smallest allowed interval for minute-stepped schedules.
pub const MIN_INTERVAL_MINUTES: u32 = 5;

/// A parsed schedule bound to a timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: ::cron::Schedule,
    tz: Tz,
}

impl CronSchedule {
    pub fn parse(expression: &str, tz: Tz) -> Result<Self, String> {
        let converted = to_cron_crate_format(expression)?;
        let schedule = ::cron::Schedule::from_str(&converted)
            .map_err(|e| format!("invalid cron expression '{expression}': {e}"))?;
        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
            tz,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .take(count)
            .map(|t| t.with_timezone(&Utc))
            .collect()
    }
}

/// Resolve an IANA timezone name, falling back to UTC.
pub fn parse_timezone(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        tracing::warn!("⚠️ Unknown timezone '{}', using UTC", name);
        Tz::UTC
    })
}

/// Syntax check only.
pub fn validate_cron(expression: &str) -> Result<(), String> {
    CronSchedule::parse(expression, Tz::UTC).map(|_| ())
}

/// Interval implied by a minute-stepped expression.
///
/// Only meaningful when hour, day-of-month and month are all `*`:
/// `* * * * *` is 1 minute, `*/N * * * *` is N minutes.
pub fn extract_interval_minutes(expression: &str) -> Option<u32> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let [minute, hour, dom, month, _dow] = fields.as_slice() else {
        return None;
    };
    if *hour != "*" || *dom != "*" || *month != "*" {
        return None;
    }
    if *minute == "*" {
        return Some(1);
    }
    minute.strip_prefix("*/")?.parse().ok()
}

/// Syntax check plus the minimum interval rule.
pub fn validate_schedule(expression: &str) -> Result<(), String> {
    validate_cron(expression)?;
    if let Some(minutes) = extract_interval_minutes(expression)
        && minutes < MIN_INTERVAL_MINUTES
    {
        return Err(format!(
            "schedule interval must be at least {MIN_INTERVAL_MINUTES} minutes"
        ));
    }
    Ok(())
}

fn to_cron_crate_format(expression: &str) -> Result<String, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields.as_slice() else {
        return Err(format!(
            "invalid cron expression '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
            expression.trim()
        ));
    };
    Ok(format!(
        "0 {minute} {hour} {dom} {month} {} *",
        translate_day_of_week(dow)?
    ))
}

/// Renumber a day-of-week field from 0-7 (Sun=0 or 7) to 1-7 (Sun=1).
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let parse = |s: &str| -> Result<u32, String> {
        let n: u32 = s
            .parse()
            .map_err(|_| format!("invalid day-of-week value '{s}'"))?;
        if n > 7 {
            return Err(format!("day-of-week value {n} out of range 0-7"));
        }
        Ok(n)
    };

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, parse_step(step)?),
            None => (item, 1),
        };
        let (lo, hi) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse(a)?, parse(b)?)
        } else {
            let n = parse(range)?;
            if step > 1 { (n, 6) } else { (n, n) }
        };
        if lo > hi {
            return Err(format!("invalid day-of-week range '{range}'"));
        }
        for day in (lo..=hi).step_by(step) {
            days.insert(day % 7);
        }
    }

    if days.len() == 7 {
        return Ok("*".to_string());
    }
    Ok(days
        .iter()
        .map(|d| (d + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_step(step: &str) -> Result<usize, String> {
    match step.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("invalid step '{step}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_daily_in_timezone() {
        let tz = parse_timezone("Asia/Tokyo");
        let schedule = CronSchedule::parse("0 4 * * *", tz).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        // 04:00 JST is 19:00 UTC the previous day.
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 22, 19, 0, 0).unwrap());
    }

    #[test]
    fn test_every_fifteen_minutes() {
        let schedule = CronSchedule::parse("*/15 * * * *", Tz::UTC).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let times = schedule.upcoming(after, 3);
        let minutes: Vec<u32> = times.iter().map(|t| t.minute()).collect();
        assert_eq!(minutes, vec![15, 30, 45]);
    }

    #[test]
    fn test_weekdays_use_standard_numbering() {
        let schedule = CronSchedule::parse("30 9 * * 1-5", Tz::UTC).unwrap();
        // 2026-02-21 is a Saturday.
        let after = Utc.with_ymd_and_hms(2026, 2, 21, 12, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (9, 30));

        let sunday = CronSchedule::parse("0 0 * * 0", Tz::UTC).unwrap();
        assert_eq!(sunday.next_after(after).unwrap().weekday(), Weekday::Sun);
        let sunday7 = CronSchedule::parse("0 0 * * 7", Tz::UTC).unwrap();
        assert_eq!(sunday7.next_after(after).unwrap().weekday(), Weekday::Sun);
    }

    #[test]
    fn test_day_of_week_translation() {
        assert_eq!(translate_day_of_week("*").unwrap(), "*");
        assert_eq!(translate_day_of_week("0").unwrap(), "1");
        assert_eq!(translate_day_of_week("1-5").unwrap(), "2,3,4,5,6");
        assert_eq!(translate_day_of_week("5-7").unwrap(), "1,6,7");
        assert_eq!(translate_day_of_week("*/2").unwrap(), "1,3,5,7");
        assert_eq!(translate_day_of_week("0-7").unwrap(), "*");
        assert_eq!(translate_day_of_week("Mon-Fri").unwrap(), "Mon-Fri");
        assert!(translate_day_of_week("8").is_err());
        assert!(translate_day_of_week("5-1").is_err());
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert!(validate_cron("* * * *").is_err());
        assert!(validate_cron("0 * * * * *").is_err());
        assert!(validate_cron("bad").is_err());
        assert!(validate_cron("61 * * * *").is_err());
        assert!(validate_cron("0 2 1 * *").is_ok());
    }

    #[test]
    fn test_extract_interval_minutes() {
        assert_eq!(extract_interval_minutes("* * * * *"), Some(1));
        assert_eq!(extract_interval_minutes("*/2 * * * *"), Some(2));
        assert_eq!(extract_interval_minutes("*/30 * * * 1-5"), Some(30));
        assert_eq!(extract_interval_minutes("*/2 8 * * *"), None);
        assert_eq!(extract_interval_minutes("0 4 * * *"), None);
    }

    #[test]
    fn test_minimum_interval_enforced() {
        let err = validate_schedule("*/2 * * * *").unwrap_err();
        assert_eq!(err, "schedule interval must be at least 5 minutes");
        assert!(validate_schedule("* * * * *").is_err());
        assert!(validate_schedule("*/5 * * * *").is_ok());
        assert!(validate_schedule("*/2 8 * * *").is_ok());
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        assert_eq!(parse_timezone("Mars/Olympus"), Tz::UTC);
        assert_eq!(parse_timezone("Asia/Tokyo"), chrono_tz::Asia::Tokyo);
    }
}
