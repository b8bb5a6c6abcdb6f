//! Error and Result types for feed storage operations.

use crate::store::Timestamp;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

/// The error type for feed storage and transformation operations.
#[derive(Debug, Error)]
pub enum FeedError {
    /// A sparse record carried the wrong marker byte.
    #[error("Format mismatch in {} at offset {offset}: expected marker 0xF9, got {found:#04x}", .path.display())]
    FormatMismatch {
        /// File being read.
        path: PathBuf,
        /// Byte offset of the offending record.
        offset: u64,
        /// Marker byte actually found.
        found: u8,
    },

    /// Fewer bytes were available than a fixed-size structure needs.
    #[error("Short read in {}: expected {expected} bytes, got {actual}", .path.display())]
    ShortRead {
        /// File being read.
        path: PathBuf,
        /// Number of bytes required.
        expected: usize,
        /// Number of bytes available.
        actual: usize,
    },

    /// A trailing fragment smaller than one record was found.
    #[error("Truncated record in {} at offset {offset}: {len} trailing bytes", .path.display())]
    TruncatedRecord {
        /// File being read.
        path: PathBuf,
        /// Byte offset where the fragment starts.
        offset: u64,
        /// Length of the fragment in bytes.
        len: usize,
    },

    /// Sampling intervals disagree.
    #[error("Interval mismatch at t={at}: expected {expected}s, got {actual}s")]
    IntervalMismatch {
        /// Interval that was required.
        expected: i64,
        /// Interval that was found.
        actual: i64,
        /// Timestamp at which the disagreement was detected.
        at: Timestamp,
    },

    /// Two feeds to merge share the same start time.
    #[error("Duplicate feed: both feeds start at {start_time}")]
    Duplicate {
        /// The shared start time.
        start_time: Timestamp,
    },

    /// The older feed ends at or after the start of the newer one.
    #[error("Overlapping feeds: old feed ends at {old_end}, new feed starts at {new_start}")]
    Overlap {
        /// End time of the older feed.
        old_end: Timestamp,
        /// Start time of the newer feed.
        new_start: Timestamp,
    },

    /// The gap between two feeds exceeds the configured ceiling.
    #[error("Gap of {gap}s between feeds exceeds maximum of {max_gap}s")]
    GapTooLarge {
        /// Gap in seconds.
        gap: i64,
        /// Configured ceiling in seconds.
        max_gap: i64,
    },

    /// A positional access addressed a record past the end of the store.
    #[error("Index {index} out of range in {} ({npoints} records)", .path.display())]
    OutOfRange {
        /// File being accessed.
        path: PathBuf,
        /// Requested record index.
        index: u64,
        /// Number of whole records in the store.
        npoints: u64,
    },

    /// Sampling interval that is zero or unusable for the operation.
    #[error("Invalid interval: {0}s")]
    InvalidInterval(u32),

    /// Timestamp that does not fit the on-disk unsigned 32-bit field or
    /// cannot be placed in the requested time zone.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(Timestamp),

    /// A text interchange line could not be parsed.
    #[error("Parse error on line {line}: {reason}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        reason: String,
    },

    /// An output path is also one of the inputs.
    #[error("Destination {} is also an input", .0.display())]
    DestinationConflict(PathBuf),

    /// The ingestion sink refused or mangled a point.
    #[error("Sink rejected point t={time} value={value}: {reason}")]
    SinkRejected {
        /// Time of the rejected point.
        time: Timestamp,
        /// Value of the rejected point.
        value: f32,
        /// Status or echo problem.
        reason: String,
    },

    /// I/O error while operating on a named file.
    #[error("I/O error on {}: {source}", .path.display())]
    FileIo {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl FeedError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn file_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}
