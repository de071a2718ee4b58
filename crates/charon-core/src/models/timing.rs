//! Recurring timing specifications
//!
//! A [`TimingSpec`] is a recurrence pattern over years, months, month days,
//! week days and a daily `[start, end)` window. Empty component sets mean
//! "any". The distinguished ASAP value fires once, immediately, on load.
//!
//! Week days are stored as integers, 0 = Sunday through 6 = Saturday.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

fn midnight() -> NaiveTime {
    NaiveTime::from_hms_opt(0, 0, 0).expect("midnight is a valid time")
}

/// Recurrence pattern for rate intervals, balance activation windows and
/// scheduled action timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSpec {
    /// Matching years; empty = any
    #[serde(default)]
    pub years: Vec<i32>,

    /// Matching months (1-12); empty = any
    #[serde(default)]
    pub months: Vec<u32>,

    /// Matching days of month (1-31); empty = any
    #[serde(default)]
    pub month_days: Vec<u32>,

    /// Matching week days (0 = Sunday .. 6 = Saturday); empty = any
    #[serde(default)]
    pub week_days: Vec<u32>,

    /// Start of the daily window
    #[serde(default = "midnight")]
    pub start_time: NaiveTime,

    /// Open end of the daily window; `None` runs to end of day, an end
    /// before the start wraps past midnight
    #[serde(default)]
    pub end_time: Option<NaiveTime>,

    /// Fire once, immediately, on load
    #[serde(default)]
    pub asap: bool,
}

impl Default for TimingSpec {
    fn default() -> Self {
        Self {
            years: Vec::new(),
            months: Vec::new(),
            month_days: Vec::new(),
            week_days: Vec::new(),
            start_time: midnight(),
            end_time: None,
            asap: false,
        }
    }
}

impl TimingSpec {
    /// The ASAP sentinel
    pub fn asap() -> Self {
        Self {
            asap: true,
            ..Self::default()
        }
    }

    /// Timing starting at the given time of day, every day
    pub fn daily(start_time: NaiveTime) -> Self {
        Self {
            start_time,
            ..Self::default()
        }
    }

    /// True when every component is open and the window covers the day
    pub fn is_blank(&self) -> bool {
        !self.asap
            && self.years.is_empty()
            && self.months.is_empty()
            && self.month_days.is_empty()
            && self.week_days.is_empty()
            && self.start_time == midnight()
            && self.end_time.is_none()
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        if !self.years.is_empty() && !self.years.contains(&date.year()) {
            return false;
        }
        if !self.months.is_empty() && !self.months.contains(&date.month()) {
            return false;
        }
        if !self.month_days.is_empty() && !self.month_days.contains(&date.day()) {
            return false;
        }
        if !self.week_days.is_empty()
            && !self
                .week_days
                .contains(&date.weekday().num_days_from_sunday())
        {
            return false;
        }
        true
    }

    fn time_matches(&self, tod: NaiveTime) -> bool {
        match self.end_time {
            None => tod >= self.start_time,
            Some(end) if end > self.start_time => tod >= self.start_time && tod < end,
            // end <= start wraps past midnight
            Some(end) => tod >= self.start_time || tod < end,
        }
    }

    /// Whether the instant falls inside this timing
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        if self.asap {
            return false;
        }
        self.date_matches(t.date_naive()) && self.time_matches(t.time())
    }

    /// Start of the daily window on the instant's date
    pub fn left_margin(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        Utc.from_utc_datetime(&t.date_naive().and_time(self.start_time))
    }

    /// End of the daily window on the instant's date; without an explicit
    /// end this is the start of the next day
    pub fn right_margin(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self.end_time {
            Some(end) => Utc.from_utc_datetime(&t.date_naive().and_time(end)),
            None => {
                let next = t.date_naive().succ_opt().unwrap_or(t.date_naive());
                Utc.from_utc_datetime(&next.and_time(midnight()))
            }
        }
    }

    /// Least matching instant `t' >= after`, advancing component by
    /// component. Returns `None` when no instant can ever match (e.g. all
    /// listed years are in the past). Idempotent on its own result.
    pub fn next_start(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.asap {
            return None;
        }
        let mut date = after.date_naive();
        if after.time() > self.start_time {
            date = date.succ_opt()?;
        }
        // snapping a component resets the finer ones to their minima, so
        // each loop pass jumps over a whole non-matching year, month or
        // day; week-day scanning advances one day at a time
        for _ in 0..=(366 * 8) {
            if self.date_matches(date) {
                return Some(Utc.from_utc_datetime(&date.and_time(self.start_time)));
            }
            date = self.next_candidate_date(date)?;
        }
        None
    }

    fn next_candidate_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        if !self.years.is_empty() && !self.years.contains(&date.year()) {
            let year = self.years.iter().copied().filter(|&y| y > date.year()).min()?;
            return NaiveDate::from_ymd_opt(year, 1, 1);
        }
        if !self.months.is_empty() && !self.months.contains(&date.month()) {
            if let Some(month) = self
                .months
                .iter()
                .copied()
                .filter(|&m| (1..=12).contains(&m) && m > date.month())
                .min()
            {
                return NaiveDate::from_ymd_opt(date.year(), month, 1);
            }
            // no month left this year
            return self.bump_year(date);
        }
        if !self.month_days.is_empty() && !self.month_days.contains(&date.day()) {
            if let Some(day) = self
                .month_days
                .iter()
                .copied()
                .filter(|&d| d > date.day())
                .min()
            {
                if let Some(next) = NaiveDate::from_ymd_opt(date.year(), date.month(), day) {
                    return Some(next);
                }
            }
            return self.bump_month(date);
        }
        // week-day mismatch, or start time already passed on a matching day
        date.succ_opt()
    }

    fn bump_month(&self, date: NaiveDate) -> Option<NaiveDate> {
        if date.month() == 12 {
            self.bump_year(date)
        } else {
            NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
        }
    }

    fn bump_year(&self, date: NaiveDate) -> Option<NaiveDate> {
        if !self.years.is_empty() {
            let year = self
                .years
                .iter()
                .copied()
                .filter(|&y| y > date.year())
                .min()?;
            return NaiveDate::from_ymd_opt(year, 1, 1);
        }
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    }

    /// Parse the textual form: comma-separated integers or `*any` for
    /// years, months, month days; week days accept names or integers;
    /// time is `HH:MM:SS` or `*asap`
    pub fn from_fields(
        years: &str,
        months: &str,
        month_days: &str,
        week_days: &str,
        start_time: &str,
        end_time: &str,
    ) -> AppResult<Self> {
        if start_time.eq_ignore_ascii_case("*asap") {
            return Ok(Self::asap());
        }
        let spec = Self {
            years: parse_int_series(years)?,
            months: parse_int_series(months)?,
            month_days: parse_int_series(month_days)?,
            week_days: parse_week_days(week_days)?,
            start_time: parse_time(start_time)?,
            end_time: if end_time.is_empty() || end_time == super::ANY {
                None
            } else {
                Some(parse_time(end_time)?)
            },
            asap: false,
        };
        Ok(spec)
    }
}

fn parse_int_series<T: std::str::FromStr>(src: &str) -> AppResult<Vec<T>> {
    if src.is_empty() || src == super::ANY {
        return Ok(Vec::new());
    }
    src.split(',')
        .map(|part| {
            part.trim()
                .parse::<T>()
                .map_err(|_| AppError::Parser(format!("invalid series element: {}", part)))
        })
        .collect()
}

fn parse_week_days(src: &str) -> AppResult<Vec<u32>> {
    if src.is_empty() || src == super::ANY {
        return Ok(Vec::new());
    }
    src.split(',')
        .map(|part| {
            let part = part.trim();
            if let Ok(n) = part.parse::<u32>() {
                if n <= 6 {
                    return Ok(n);
                }
                return Err(AppError::Parser(format!("invalid week day: {}", part)));
            }
            match part.to_ascii_lowercase().as_str() {
                "sunday" | "sun" => Ok(0),
                "monday" | "mon" => Ok(1),
                "tuesday" | "tue" => Ok(2),
                "wednesday" | "wed" => Ok(3),
                "thursday" | "thu" => Ok(4),
                "friday" | "fri" => Ok(5),
                "saturday" | "sat" => Ok(6),
                _ => Err(AppError::Parser(format!("invalid week day: {}", part))),
            }
        })
        .collect()
}

fn parse_time(src: &str) -> AppResult<NaiveTime> {
    if src.is_empty() || src == super::ANY {
        return Ok(midnight());
    }
    NaiveTime::parse_from_str(src, "%H:%M:%S")
        .map_err(|_| AppError::Parser(format!("invalid time of day: {}", src)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_blank_matches_everything() {
        let spec = TimingSpec::default();
        assert!(spec.is_blank());
        assert!(spec.matches(ts("2014-03-04T06:00:00Z")));
        assert!(spec.matches(ts("2024-12-31T23:59:59Z")));
    }

    #[test]
    fn test_component_sets() {
        let spec = TimingSpec {
            months: vec![3],
            week_days: vec![2], // Tuesday
            ..TimingSpec::default()
        };
        // 2014-03-04 was a Tuesday
        assert!(spec.matches(ts("2014-03-04T06:00:00Z")));
        assert!(!spec.matches(ts("2014-03-05T06:00:00Z")));
        assert!(!spec.matches(ts("2014-04-01T06:00:00Z")));
    }

    #[test]
    fn test_daily_window_open_end() {
        let spec = TimingSpec {
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: Some(NaiveTime::from_hms_opt(18, 0, 0).unwrap()),
            ..TimingSpec::default()
        };
        assert!(spec.matches(ts("2024-01-01T08:00:00Z")));
        assert!(spec.matches(ts("2024-01-01T17:59:59Z")));
        assert!(!spec.matches(ts("2024-01-01T18:00:00Z")));
        assert!(!spec.matches(ts("2024-01-01T07:59:59Z")));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let spec = TimingSpec {
            start_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end_time: Some(NaiveTime::from_hms_opt(6, 0, 0).unwrap()),
            ..TimingSpec::default()
        };
        assert!(spec.matches(ts("2024-01-01T23:30:00Z")));
        assert!(spec.matches(ts("2024-01-01T05:59:59Z")));
        assert!(!spec.matches(ts("2024-01-01T12:00:00Z")));
    }

    #[test]
    fn test_next_start_same_day() {
        let spec = TimingSpec::daily(NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let next = spec.next_start(ts("2024-01-01T06:00:00Z")).unwrap();
        assert_eq!(next, ts("2024-01-01T08:00:00Z"));
    }

    #[test]
    fn test_next_start_rolls_over() {
        let spec = TimingSpec::daily(NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let next = spec.next_start(ts("2024-01-01T09:00:00Z")).unwrap();
        assert_eq!(next, ts("2024-01-02T08:00:00Z"));
    }

    #[test]
    fn test_next_start_idempotent() {
        let spec = TimingSpec {
            months: vec![6],
            month_days: vec![15],
            start_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            ..TimingSpec::default()
        };
        let first = spec.next_start(ts("2024-01-20T00:00:00Z")).unwrap();
        assert_eq!(first, ts("2024-06-15T12:00:00Z"));
        assert_eq!(spec.next_start(first), Some(first));
    }

    #[test]
    fn test_next_start_snaps_year() {
        let spec = TimingSpec {
            years: vec![2030],
            ..TimingSpec::default()
        };
        let next = spec.next_start(ts("2024-05-05T10:00:00Z")).unwrap();
        assert_eq!(next, ts("2030-01-01T00:00:00Z"));
    }

    #[test]
    fn test_next_start_exhausted_years() {
        let spec = TimingSpec {
            years: vec![2020],
            ..TimingSpec::default()
        };
        assert_eq!(spec.next_start(ts("2024-01-01T01:00:00Z")), None);
    }

    #[test]
    fn test_next_start_week_day() {
        let spec = TimingSpec {
            week_days: vec![1], // Monday
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            ..TimingSpec::default()
        };
        // 2024-01-01 was a Monday at 10:00, so the next Monday is Jan 8
        let next = spec.next_start(ts("2024-01-01T10:00:00Z")).unwrap();
        assert_eq!(next, ts("2024-01-08T09:00:00Z"));
    }

    #[test]
    fn test_asap_never_matches() {
        let spec = TimingSpec::asap();
        assert!(!spec.matches(ts("2024-01-01T10:00:00Z")));
        assert_eq!(spec.next_start(ts("2024-01-01T10:00:00Z")), None);
    }

    #[test]
    fn test_from_fields() {
        let spec =
            TimingSpec::from_fields("*any", "1,2", "*any", "monday,fri", "08:30:00", "").unwrap();
        assert_eq!(spec.months, vec![1, 2]);
        assert_eq!(spec.week_days, vec![1, 5]);
        assert_eq!(spec.start_time, NaiveTime::from_hms_opt(8, 30, 0).unwrap());

        let asap = TimingSpec::from_fields("", "", "", "", "*asap", "").unwrap();
        assert!(asap.asap);
    }

    #[test]
    fn test_from_fields_rejects_garbage() {
        assert!(TimingSpec::from_fields("twenty", "", "", "", "00:00:00", "").is_err());
        assert!(TimingSpec::from_fields("", "", "", "noday", "00:00:00", "").is_err());
        assert!(TimingSpec::from_fields("", "", "", "", "8h30", "").is_err());
    }
}
