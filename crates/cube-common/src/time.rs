//! Time handling utilities for observation data.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GeoError, GeoResult};

/// Parse an ISO 8601 timestamp into UTC.
///
/// Accepts RFC 3339 with offset, naive datetimes (assumed UTC, with or
/// without fractional seconds, `T` or space separated) and bare dates.
pub fn parse_datetime(s: &str) -> GeoResult<DateTime<Utc>> {
    let s = s.trim();

    // Try full datetime with timezone
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try without timezone (assume UTC)
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    // Try date only
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(GeoError::InvalidTime(s.to_string()))
}

/// Approximate local solar time offset for a longitude, rounded to whole hours.
pub fn solar_offset(longitude: f64) -> Duration {
    Duration::hours((longitude * 24.0 / 360.0).round() as i64)
}

/// Calendar date of the local solar day an observation falls on.
///
/// A satellite overpass happens in local daytime; shifting the UTC
/// timestamp by the longitude offset keeps one overpass on a single date
/// even when it straddles UTC midnight.
pub fn solar_day(time: DateTime<Utc>, longitude: f64) -> NaiveDate {
    (time + solar_offset(longitude)).date_naive()
}

/// An inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range; the endpoints are swapped if given in reverse.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// A zero-length range at a single instant.
    pub fn instant(time: DateTime<Utc>) -> Self {
        Self { start: time, end: time }
    }

    /// Range covering a whole calendar day (UTC), inclusive of the last microsecond.
    pub fn day(date: NaiveDate) -> Self {
        let start = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
        Self {
            start,
            end: start + Duration::days(1) - Duration::microseconds(1),
        }
    }

    /// Parse a `start/end` interval, or a single instant.
    pub fn parse(s: &str) -> GeoResult<Self> {
        match s.split_once('/') {
            Some((start, end)) => Ok(Self::new(parse_datetime(start)?, parse_datetime(end)?)),
            None => Ok(Self::instant(parse_datetime(s)?)),
        }
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt <= &self.end
    }

    /// Inclusive interval overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Midpoint of the range.
    pub fn center(&self) -> DateTime<Utc> {
        self.start + (self.end - self.start) / 2
    }
}
