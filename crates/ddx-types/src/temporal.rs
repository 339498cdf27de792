//! Temporal normalization: timezone folding and datetime truncation.
//!
//! Truncation is a pure, idempotent function applied before comparison and
//! hashing, so two datetimes naming the same instant in different zones
//! normalize identically.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Timelike, Utc};

use crate::error::TypeError;

/// Granularity a datetime may be truncated to before comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TruncateLevel {
    Second,
    Minute,
    Hour,
    Day,
}

impl FromStr for TruncateLevel {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "second" => Ok(Self::Second),
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            other => Err(TypeError::InvalidLiteral(other.to_string())),
        }
    }
}

impl fmt::Display for TruncateLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        })
    }
}

/// Fold to UTC and truncate to the requested granularity.
pub fn normalize_datetime(
    dt: &DateTime<FixedOffset>,
    truncate: Option<TruncateLevel>,
) -> DateTime<Utc> {
    let utc = dt.with_timezone(&Utc);
    match truncate {
        None => utc,
        Some(level) => {
            let naive = utc.naive_utc();
            let t = naive.time();
            let truncated = match level {
                TruncateLevel::Second => t.with_nanosecond(0),
                TruncateLevel::Minute => NaiveTime::from_hms_opt(t.hour(), t.minute(), 0),
                TruncateLevel::Hour => NaiveTime::from_hms_opt(t.hour(), 0, 0),
                TruncateLevel::Day => NaiveTime::from_hms_opt(0, 0, 0),
            }
            .unwrap_or(t);
            DateTime::from_naive_utc_and_offset(naive.date().and_time(truncated), Utc)
        }
    }
}

/// Total seconds of a duration, fractional part included.
pub fn duration_total_seconds(d: &TimeDelta) -> f64 {
    d.num_seconds() as f64 + d.subsec_nanos() as f64 / 1e9
}

/// Seconds since midnight for a time-of-day value.
pub fn seconds_of_day(t: &NaiveTime) -> u32 {
    t.num_seconds_from_midnight()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn same_instant_different_zones_normalize_equal() {
        let a = dt("2023-06-01T10:00:00+00:00");
        let b = dt("2023-06-01T12:00:00+02:00");
        for level in [None, Some(TruncateLevel::Minute), Some(TruncateLevel::Day)] {
            assert_eq!(normalize_datetime(&a, level), normalize_datetime(&b, level));
        }
    }

    #[test]
    fn truncation_is_idempotent() {
        let a = dt("2023-06-01T10:21:43.512+00:00");
        let once = normalize_datetime(&a, Some(TruncateLevel::Minute));
        let twice = normalize_datetime(&once.fixed_offset(), Some(TruncateLevel::Minute));
        assert_eq!(once, twice);
        assert_eq!(
            once,
            Utc.with_ymd_and_hms(2023, 6, 1, 10, 21, 0).unwrap()
        );
    }

    #[test]
    fn day_truncation_drops_the_clock() {
        let a = dt("2023-06-01T23:59:59+00:00");
        assert_eq!(
            normalize_datetime(&a, Some(TruncateLevel::Day)),
            Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn duration_seconds_include_fraction() {
        let d = TimeDelta::seconds(90) + TimeDelta::milliseconds(250);
        assert!((duration_total_seconds(&d) - 90.25).abs() < 1e-9);
    }
}
