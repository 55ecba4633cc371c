//! Time-bucketing policy for shard partitioning.
//!
//! An interval groups a table's data by timestamp. Every shard path
//! contains the interval name plus the formatted start of the bucket the
//! timestamp falls into. `Single` is the degenerate policy: everything
//! lands in one fixed bucket.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArmorError, Result};

/// Bucket start used by the `Single` interval.
pub const SINGLE_INTERVAL_START: &str = "1970-01-01T00:00:00Z";

/// Time-bucketing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Single,
    Hourly,
    Daily,
    Monthly,
    Yearly,
}

impl Interval {
    /// Path segment for this interval.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Single => "single",
            Interval::Hourly => "hourly",
            Interval::Daily => "daily",
            Interval::Monthly => "monthly",
            Interval::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Interval::Single),
            "hourly" => Some(Interval::Hourly),
            "daily" => Some(Interval::Daily),
            "monthly" => Some(Interval::Monthly),
            "yearly" => Some(Interval::Yearly),
            _ => None,
        }
    }

    /// Format the start of the bucket `timestamp` falls into.
    pub fn interval_start(&self, timestamp: DateTime<Utc>) -> String {
        self.truncate(timestamp).format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// Format the start of the bucket `offset` intervals away from the one
    /// `timestamp` falls into. Negative offsets address earlier slices.
    pub fn interval_start_offset(&self, timestamp: DateTime<Utc>, offset: i32) -> String {
        let start = self.truncate(timestamp);
        let shifted = match self {
            Interval::Single => start,
            Interval::Hourly => start + Duration::hours(offset as i64),
            Interval::Daily => start + Duration::days(offset as i64),
            Interval::Monthly => shift_months(start, offset),
            Interval::Yearly => shift_months(start, offset * 12),
        };
        shifted.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// Parse an interval-start string produced by this policy.
    pub fn parse_interval_start(s: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ArmorError::InvalidFormat(format!("bad interval start '{s}': {e}")))
    }

    fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let (year, month, day, hour) = (ts.year(), ts.month(), ts.day(), ts.hour());
        let ymdh = match self {
            Interval::Single => (1970, 1, 1, 0),
            Interval::Hourly => (year, month, day, hour),
            Interval::Daily => (year, month, day, 0),
            Interval::Monthly => (year, month, 1, 0),
            Interval::Yearly => (year, 1, 1, 0),
        };
        Utc.with_ymd_and_hms(ymdh.0, ymdh.1, ymdh.2, ymdh.3, 0, 0)
            .unwrap()
    }
}

fn shift_months(start: DateTime<Utc>, offset: i32) -> DateTime<Utc> {
    if offset >= 0 {
        start
            .checked_add_months(Months::new(offset as u32))
            .unwrap_or(start)
    } else {
        start
            .checked_sub_months(Months::new(offset.unsigned_abs()))
            .unwrap_or(start)
    }
}
