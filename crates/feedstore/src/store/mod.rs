//! On-disk feed stores.
//!
//! Two binary layouts are supported:
//!
//! - **Fixed-interval** (`<feedid>.dat` + `<feedid>.meta`): a headerless array of
//!   little-endian `f32` samples. Sample `i` lives at byte offset `i * 4` and its
//!   time is `start_time + i * interval`, both taken from the 16-byte meta header.
//! - **Sparse event** (`feed_<feedid>.MYD`): a stream of 9-byte records, each a
//!   `0xF9` marker, a little-endian `u32` unix time and a little-endian `f32` value.
//!
//! A missing sample is encoded on disk as IEEE NaN. At the API boundary it is
//! `None` (see [`Sample`]); NaN is never compared with `==`.

pub mod fixed;
pub mod meta;
pub mod sparse;

pub use fixed::{FixedAppender, FixedIntervalStore, FixedPoints, FIXED_RECORD_LEN};
pub use meta::{meta_path_for, Meta, MetaHeader, META_HEADER_SIZE};
pub use sparse::{
    SparseAppender, SparseEventStore, SparseMeta, SparseRecord, SparseRecords, SPARSE_MARKER,
    SPARSE_RECORD_LEN,
};

use crate::error::{FeedError, Result};
use std::path::Path;

/// Unix time in seconds.
///
/// Stored on disk as `u32`; computations use `i64` so that differences and
/// `start + index * interval` never wrap.
pub type Timestamp = i64;

/// A sample value, `None` when the sample is missing.
pub type Sample = Option<f32>;

/// A timestamped sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Unix time in seconds.
    pub time: Timestamp,
    /// Sample value, `None` if missing.
    pub value: Sample,
}

impl Point {
    /// Creates a new point.
    pub fn new(time: Timestamp, value: Sample) -> Self {
        Self { time, value }
    }

    /// Creates a point with a missing value.
    pub fn missing(time: Timestamp) -> Self {
        Self { time, value: None }
    }
}

/// Encodes a sample into its on-disk bytes. Missing samples become NaN.
pub fn encode_sample(sample: Sample) -> [u8; 4] {
    sample.unwrap_or(f32::NAN).to_le_bytes()
}

/// Decodes on-disk bytes into a sample. Any NaN bit pattern is missing.
pub fn decode_sample(bytes: [u8; 4]) -> Sample {
    let value = f32::from_le_bytes(bytes);
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

/// Converts a timestamp into the unsigned 32-bit on-disk field.
pub(crate) fn disk_time(time: Timestamp) -> Result<u32> {
    u32::try_from(time).map_err(|_| FeedError::InvalidTimestamp(time))
}

/// `start + interval * index`, saturating instead of overflowing.
pub(crate) fn offset_time(start: Timestamp, interval: u32, index: u64) -> Timestamp {
    let index = Timestamp::try_from(index).unwrap_or(Timestamp::MAX);
    start.saturating_add(Timestamp::from(interval).saturating_mul(index))
}

/// Detects the sampling interval from the first three points.
///
/// Returns `Ok(None)` when fewer than three points are given.
///
/// # Errors
///
/// Returns `FeedError::IntervalMismatch` if the two consecutive deltas differ
/// and `FeedError::InvalidInterval` if the delta is not a positive `u32`.
pub fn detect_interval(points: &[Point]) -> Result<Option<u32>> {
    let [a, b, c, ..] = points else {
        return Ok(None);
    };
    let first = b.time - a.time;
    let second = c.time - b.time;
    if first != second {
        return Err(FeedError::IntervalMismatch {
            expected: first,
            actual: second,
            at: c.time,
        });
    }
    match u32::try_from(first) {
        Ok(interval) if interval > 0 => Ok(Some(interval)),
        _ => Err(FeedError::InvalidInterval(0)),
    }
}

/// Kind of feed, derived from its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// `<feedid>.dat` with a `<feedid>.meta` header.
    Fixed,
    /// `feed_<feedid>.MYD`.
    Sparse,
}

impl FeedKind {
    /// Classifies a path by naming convention and extracts the feed id.
    ///
    /// Returns `None` for names that follow neither convention.
    pub fn from_path(path: &Path) -> Option<(Self, u32)> {
        let stem = path.file_stem()?.to_str()?;
        let ext = path.extension()?.to_str()?;
        match ext {
            "dat" => parse_feed_id(stem).map(|id| (Self::Fixed, id)),
            "MYD" => stem
                .strip_prefix("feed_")
                .and_then(parse_feed_id)
                .map(|id| (Self::Sparse, id)),
            _ => None,
        }
    }
}

fn parse_feed_id(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
