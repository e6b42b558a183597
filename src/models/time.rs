use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Half-open time range `[start, end)`; a missing bound is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Everything at or after `start`
    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }

    /// Check if the range can contain anything
    pub fn is_empty(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if start >= end)
    }
}

/// UTC calendar day of an instant
pub fn utc_day(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

/// `[00:00, 24:00)` of a UTC calendar day
pub fn day_range(day: NaiveDate) -> TimeRange {
    let start = Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN));
    TimeRange::new(start, start + Duration::days(1))
}

/// Start of the epoch-aligned bucket of `width` containing `at`
pub fn bucket_start(at: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_ms = width.num_milliseconds().max(1);
    let ms = at.timestamp_millis();
    let aligned = ms.div_euclid(width_ms) * width_ms;
    Utc.timestamp_millis_opt(aligned).single().unwrap_or(at)
}

/// Truncate an instant to the start of its hour
pub fn truncate_to_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    bucket_start(at, Duration::hours(1))
}
