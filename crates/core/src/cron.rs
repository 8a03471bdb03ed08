//! Five-field cron expression engine.
//!
//! Parses the classic `minute hour day-of-month month day-of-week` syntax
//! with wildcard, list, range, and step forms, and computes fire times in
//! an IANA timezone. The same parser backs both the scheduler and the
//! HTTP validation preview, so previewed times always match actual fires.
//!
//! Timezone semantics around DST transitions:
//! - a local fire time that does not exist (spring-forward gap) resolves
//!   to the first valid instant after the gap;
//! - a local fire time that occurs twice (fall-back) fires once, at the
//!   earlier occurrence.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Upper bound on the forward search, in days. `2 29 2 *` style
/// expressions can legitimately skip years; four years covers every
/// leap-day case.
const MAX_SEARCH_DAYS: i64 = 366 * 4;

/// How many fire times [`CronExpression::preview`] returns by default.
pub const PREVIEW_COUNT: usize = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field {value:?}: {reason}")]
    Field {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown timezone {0:?}")]
    Timezone(String),
}

/// One parsed cron field: the set of admitted values plus whether the
/// field was written as a bare `*` (relevant for day-of-month /
/// day-of-week combination).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    allowed: Vec<bool>,
    restricted: bool,
    min: u32,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        let idx = (value - self.min) as usize;
        idx < self.allowed.len() && self.allowed[idx]
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpression {
    /// Parse a five-field expression.
    ///
    /// Supported per-field forms: `*`, `N`, `A-B`, `*/S`, `A/S`, `A-B/S`,
    /// and comma-separated lists of any of those. Day-of-week accepts
    /// `0..=7` with `7` normalized to Sunday (`0`).
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        Ok(Self {
            minute: parse_field("minute", fields[0], 0, 59)?,
            hour: parse_field("hour", fields[1], 0, 23)?,
            day_of_month: parse_field("day", fields[2], 1, 31)?,
            month: parse_field("month", fields[3], 1, 12)?,
            day_of_week: parse_weekday_field(fields[4])?,
        })
    }

    /// Does this expression admit the given local date?
    ///
    /// Day-of-month and day-of-week combine per classic cron: when both
    /// are restricted the date matches if *either* does; otherwise the
    /// restricted one (or neither) decides.
    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.month.contains(date.month()) {
            return false;
        }

        let dom = self.day_of_month.contains(date.day());
        let dow = self
            .day_of_week
            .contains(date.weekday().num_days_from_sunday());

        match (self.day_of_month.restricted, self.day_of_week.restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// Smallest instant strictly greater than `after` satisfying this
    /// expression, evaluated in `tz`.
    ///
    /// Returns `None` only when no matching instant exists within the
    /// search horizon (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(&tz);
        let mut date = local_after.date_naive();

        for _ in 0..MAX_SEARCH_DAYS {
            if self.matches_date(date) {
                // Hours/minutes earlier on the starting date are pruned;
                // every later date scans from 00:00.
                let (start_hour, start_minute) = if date == local_after.date_naive() {
                    (local_after.hour(), local_after.minute())
                } else {
                    (0, 0)
                };

                for hour in 0..24u32 {
                    if hour < start_hour || !self.hour.contains(hour) {
                        continue;
                    }
                    for minute in 0..60u32 {
                        if hour == start_hour && date == local_after.date_naive() && minute <= start_minute {
                            continue;
                        }
                        if !self.minute.contains(minute) {
                            continue;
                        }
                        let naive = date.and_time(
                            NaiveTime::from_hms_opt(hour, minute, 0).expect("valid hh:mm"),
                        );
                        if let Some(instant) = resolve_local(naive, tz) {
                            let utc = instant.with_timezone(&Utc);
                            if utc > after {
                                return Some(utc);
                            }
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }

        None
    }

    /// The next `count` fire times after `after`, in order.
    pub fn preview(&self, after: DateTime<Utc>, tz: Tz, count: usize) -> Vec<DateTime<Utc>> {
        let mut runs = Vec::with_capacity(count);
        let mut cursor = after;
        while runs.len() < count {
            match self.next_after(cursor, tz) {
                Some(next) => {
                    cursor = next;
                    runs.push(next);
                }
                None => break,
            }
        }
        runs
    }
}

/// Parse an IANA timezone name (e.g. `"Europe/Berlin"`).
pub fn parse_timezone(name: &str) -> Result<Tz, CronError> {
    name.parse::<Tz>()
        .map_err(|_| CronError::Timezone(name.to_string()))
}

/// Resolve a naive local time to an instant in `tz`.
///
/// Gap times (spring-forward) advance minute by minute until a valid
/// local time is found, yielding the first instant after the gap.
/// Ambiguous times (fall-back) resolve to the earlier occurrence.
fn resolve_local(naive: chrono::NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(t) => Some(t),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest),
        chrono::LocalResult::None => {
            // DST gaps are at most a few hours anywhere in the tz database.
            let mut probe = naive;
            for _ in 0..(3 * 60) {
                probe += Duration::minutes(1);
                match tz.from_local_datetime(&probe) {
                    chrono::LocalResult::Single(t) => return Some(t),
                    chrono::LocalResult::Ambiguous(earliest, _) => return Some(earliest),
                    chrono::LocalResult::None => continue,
                }
            }
            None
        }
    }
}

fn parse_field(name: &'static str, text: &str, min: u32, max: u32) -> Result<Field, CronError> {
    let err = |reason: String| CronError::Field {
        field: name,
        value: text.to_string(),
        reason,
    };

    let mut allowed = vec![false; (max - min + 1) as usize];
    let mut restricted = false;

    for part in text.split(',') {
        if part.is_empty() {
            return Err(err("empty list element".into()));
        }

        let (range_text, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| err(format!("step {s:?} is not a number")))?;
                if step == 0 {
                    return Err(err("step must be positive".into()));
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi, is_wildcard) = if range_text == "*" {
            (min, max, true)
        } else if let Some((a, b)) = range_text.split_once('-') {
            let lo: u32 = a
                .parse()
                .map_err(|_| err(format!("range start {a:?} is not a number")))?;
            let hi: u32 = b
                .parse()
                .map_err(|_| err(format!("range end {b:?} is not a number")))?;
            if lo > hi {
                return Err(err(format!("range {lo}-{hi} is inverted")));
            }
            (lo, hi, false)
        } else {
            let v: u32 = range_text
                .parse()
                .map_err(|_| err(format!("{range_text:?} is not a number")))?;
            // `N/S` means "from N to max, every S" per classic cron.
            if part.contains('/') {
                (v, max, false)
            } else {
                (v, v, false)
            }
        };

        if lo < min || hi > max {
            return Err(err(format!("values must be within {min}-{max}")));
        }

        if !is_wildcard || step != 1 {
            restricted = true;
        }

        let mut v = lo;
        while v <= hi {
            allowed[(v - min) as usize] = true;
            v += step;
        }
    }

    Ok(Field {
        allowed,
        restricted,
        min,
    })
}

/// Day-of-week allows `0..=7`; `7` is an alias for Sunday (`0`).
fn parse_weekday_field(text: &str) -> Result<Field, CronError> {
    let mut field = parse_field("weekday", text, 0, 7)?;
    if field.allowed[7] {
        field.allowed[0] = true;
    }
    field.allowed.truncate(7);
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use chrono_tz::Tz;

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn next(expr: &str, after: &str, tz: &str) -> DateTime<Utc> {
        let cron = CronExpression::parse(expr).unwrap();
        let tz: Tz = tz.parse().unwrap();
        cron.next_after(utc(after), tz).unwrap()
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            CronExpression::parse("* * * *").unwrap_err(),
            CronError::FieldCount(4)
        );
        assert!(CronExpression::parse("* * * * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronExpression::parse("60 * * * *").is_err());
        assert!(CronExpression::parse("* 24 * * *").is_err());
        assert!(CronExpression::parse("* * 0 * *").is_err());
        assert!(CronExpression::parse("* * 32 * *").is_err());
        assert!(CronExpression::parse("* * * 13 *").is_err());
        assert!(CronExpression::parse("* * * * 8").is_err());
    }

    #[test]
    fn rejects_malformed_parts() {
        assert!(CronExpression::parse("a * * * *").is_err());
        assert!(CronExpression::parse("*/0 * * * *").is_err());
        assert!(CronExpression::parse("5-1 * * * *").is_err());
        assert!(CronExpression::parse("1,,2 * * * *").is_err());
    }

    #[test]
    fn accepts_full_syntax() {
        for expr in [
            "* * * * *",
            "*/5 * * * *",
            "0 2 * * *",
            "15,45 8-17 * * 1-5",
            "0 0 1 1 *",
            "30 4 1,15 * 5",
            "0 12 * * 7",
            "10-50/10 * * * *",
        ] {
            assert!(CronExpression::parse(expr).is_ok(), "failed: {expr}");
        }
    }

    #[test]
    fn weekday_seven_is_sunday() {
        let with_seven = CronExpression::parse("0 12 * * 7").unwrap();
        let with_zero = CronExpression::parse("0 12 * * 0").unwrap();
        assert_eq!(with_seven, with_zero);
    }

    // ------------------------------------------------------------------
    // Next-fire computation
    // ------------------------------------------------------------------

    #[test]
    fn every_five_minutes_law() {
        // Next wall-clock minute congruent to 0 mod 5, strictly after T.
        assert_eq!(
            next("*/5 * * * *", "2026-06-01 10:02:11", "UTC"),
            utc("2026-06-01 10:05:00")
        );
        // Exactly on a boundary still advances strictly.
        assert_eq!(
            next("*/5 * * * *", "2026-06-01 10:05:00", "UTC"),
            utc("2026-06-01 10:10:00")
        );
    }

    #[test]
    fn daily_rolls_over_midnight() {
        assert_eq!(
            next("0 2 * * *", "2026-06-01 03:00:00", "UTC"),
            utc("2026-06-02 02:00:00")
        );
    }

    #[test]
    fn weekday_range_skips_weekend() {
        // 2026-06-05 is a Friday; next 09:00 weekday fire after Friday
        // 10:00 is Monday 09:00.
        assert_eq!(
            next("0 9 * * 1-5", "2026-06-05 10:00:00", "UTC"),
            utc("2026-06-08 09:00:00")
        );
    }

    #[test]
    fn dom_and_dow_combine_with_or() {
        // Day 15 OR Friday. After Monday 2026-06-08, Friday the 12th
        // comes before the 15th.
        assert_eq!(
            next("0 0 15 * 5", "2026-06-08 00:00:00", "UTC"),
            utc("2026-06-12 00:00:00")
        );
        // After the Friday fire, the 15th (a Monday) is next.
        assert_eq!(
            next("0 0 15 * 5", "2026-06-12 00:00:00", "UTC"),
            utc("2026-06-15 00:00:00")
        );
    }

    #[test]
    fn month_boundary() {
        assert_eq!(
            next("0 0 1 * *", "2026-06-15 00:00:00", "UTC"),
            utc("2026-07-01 00:00:00")
        );
    }

    #[test]
    fn local_timezone_offsets_apply() {
        // 08:00 in Berlin is 06:00 UTC during CEST.
        assert_eq!(
            next("0 8 * * *", "2026-06-01 00:00:00", "Europe/Berlin"),
            utc("2026-06-01 06:00:00")
        );
    }

    #[test]
    fn dst_gap_resolves_to_first_valid_instant() {
        // US spring-forward on 2026-03-08: 02:00 EST does not exist;
        // clocks jump 02:00 -> 03:00. The fire lands on 03:00 EDT
        // (07:00 UTC).
        let fired = next("0 2 * * *", "2026-03-08 01:00:00", "America/New_York");
        assert_eq!(fired, utc("2026-03-08 07:00:00"));

        // The day after, 02:00 EDT exists again (06:00 UTC).
        let following = next("0 2 * * *", &fired.format("%Y-%m-%d %H:%M:%S").to_string(), "America/New_York");
        assert_eq!(following, utc("2026-03-09 06:00:00"));
    }

    #[test]
    fn dst_ambiguous_time_fires_once_at_first_occurrence() {
        // US fall-back on 2026-11-01: 01:30 occurs twice. The fire uses
        // the earlier (EDT, 05:30 UTC) occurrence, and the next fire is
        // the following day — not the second occurrence.
        let fired = next("30 1 * * *", "2026-11-01 00:00:00", "America/New_York");
        assert_eq!(fired, utc("2026-11-01 05:30:00"));

        let following = next("30 1 * * *", "2026-11-01 05:30:00", "America/New_York");
        assert_eq!(following, utc("2026-11-02 06:30:00"));
    }

    #[test]
    fn unsatisfiable_expression_returns_none() {
        // February 30th never exists.
        let cron = CronExpression::parse("0 0 30 2 *").unwrap();
        assert_eq!(cron.next_after(utc("2026-01-01 00:00:00"), Tz::UTC), None);
    }

    #[test]
    fn preview_returns_ordered_times() {
        let cron = CronExpression::parse("*/15 * * * *").unwrap();
        let runs = cron.preview(utc("2026-06-01 10:00:00"), Tz::UTC, 5);
        assert_eq!(runs.len(), 5);
        assert_eq!(runs[0], utc("2026-06-01 10:15:00"));
        assert_eq!(runs[4], utc("2026-06-01 11:15:00"));
        assert!(runs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn parse_timezone_accepts_iana_names() {
        assert!(parse_timezone("UTC").is_ok());
        assert!(parse_timezone("America/New_York").is_ok());
        assert!(parse_timezone("Not/AZone").is_err());
    }
}
