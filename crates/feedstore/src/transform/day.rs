//! Day bucketing at midnight.

use crate::error::{FeedError, Result};
use crate::store::Timestamp;
use chrono::{Duration, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};

/// Seconds in a nominal day. Closed days are keyed `midnight - SECONDS_PER_DAY`.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Selects the clock used to find midnight.
///
/// # Examples
/// ```rust,ignore
/// use feedstore::transform::DayBoundary;
///
/// // 2024-01-01 12:00:00 UTC
/// let next = DayBoundary::Utc.next_midnight(1_704_110_400).unwrap();
/// assert_eq!(next, 1_704_153_600);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DayBoundary {
    /// Midnight in the process-local time zone.
    #[default]
    Local,
    /// Midnight UTC.
    Utc,
    /// Midnight at a fixed offset east of UTC, in seconds.
    FixedOffset(i32),
}

impl DayBoundary {
    /// Returns the first midnight strictly after the calendar day containing `time`.
    ///
    /// If that local midnight does not exist (a DST jump at midnight), the
    /// first instant after the jump is used.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::InvalidTimestamp` if `time` cannot be represented
    /// in the selected zone or the offset is out of range.
    pub fn next_midnight(&self, time: Timestamp) -> Result<Timestamp> {
        let next = match self {
            Self::Local => next_midnight_in(&Local, time),
            Self::Utc => next_midnight_in(&Utc, time),
            Self::FixedOffset(secs) => FixedOffset::east_opt(*secs)
                .and_then(|offset| next_midnight_in(&offset, time)),
        };
        next.ok_or(FeedError::InvalidTimestamp(time))
    }
}

fn next_midnight_in<Tz: TimeZone>(tz: &Tz, time: Timestamp) -> Option<Timestamp> {
    let local = tz.timestamp_opt(time, 0).single()?;
    let midnight: NaiveDateTime = local.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.timestamp())
}

/// Running per-day total that resets at each midnight.
///
/// A sample at or after the pending midnight first closes the current day,
/// then counts toward the new one. A sample stamped exactly at midnight is
/// therefore part of the new day's total, never the day it closes.
#[derive(Debug, Clone)]
pub struct DayTotals {
    boundary: DayBoundary,
    next_midnight: Option<Timestamp>,
    total: f64,
}

impl DayTotals {
    /// Creates an empty bucket using `boundary` to find midnight.
    pub fn new(boundary: DayBoundary) -> Self {
        Self {
            boundary,
            next_midnight: None,
            total: 0.0,
        }
    }

    /// Moves the bucket to `time`.
    ///
    /// Returns the closed day as `(key, total)` when `time` crossed the
    /// pending midnight. The first call only arms the bucket.
    pub fn observe(&mut self, time: Timestamp) -> Result<Option<(Timestamp, f64)>> {
        match self.next_midnight {
            None => {
                self.next_midnight = Some(self.boundary.next_midnight(time)?);
                Ok(None)
            }
            Some(midnight) if time >= midnight => {
                let closed = (midnight - SECONDS_PER_DAY, self.total);
                self.total = 0.0;
                self.next_midnight = Some(self.boundary.next_midnight(time)?);
                Ok(Some(closed))
            }
            Some(_) => Ok(None),
        }
    }

    /// Adds to the open day.
    pub fn add(&mut self, value: f64) {
        self.total += value;
    }

    /// Total of the open day.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Closes the open day, if any sample was observed.
    pub fn finish(self) -> Option<(Timestamp, f64)> {
        self.next_midnight
            .map(|midnight| (midnight - SECONDS_PER_DAY, self.total))
    }
}
