//! Feedstore - fixed-interval and sparse-event time series feed storage
//!
//! This crate reads, writes and transforms the two binary feed layouts used
//! for long-running energy and sensor logging.
//!
//! # Components
//!
//! - [`FixedIntervalStore`]: append-only `f32` samples at a constant interval,
//!   described by a 16-byte [`MetaHeader`]
//! - [`SparseEventStore`]: append-only 9-byte timestamped event records
//! - [`buffer`]: bounded-memory chunked copy shared by every bulk transform
//! - [`GapFillMerger`]: joins two fixed-interval feeds across an outage
//! - [`PowerToEnergyAccumulator`] / [`PulseAccumulator`]: running totals with
//!   daily buckets
//! - [`text`]: line-oriented text interchange
//! - [`sink`]: contract for posting points to a remote ingestion service
//!
//! # Example
//!
//! ```rust,ignore
//! use feedstore::{BufferConfig, FixedIntervalStore, GapFillMerger, MergeConfig, MetaHeader};
//!
//! let header = MetaHeader::new(10, 1_400_000_000)?;
//! let mut store = FixedIntervalStore::create("/var/lib/phpfina/1.dat", header, BufferConfig::default())?;
//! store.append(Some(230.5))?;
//! store.append(None)?;
//!
//! let merger = GapFillMerger::new(MergeConfig::default());
//! let merged = merger.merge("1.dat".as_ref(), "2.dat".as_ref(), "3.dat".as_ref())?;
//! println!("{} samples", merged.meta.npoints);
//! ```

#![deny(missing_docs)]

pub mod buffer;
pub mod error;
pub mod sink;
pub mod store;
pub mod text;
pub mod transform;

pub use buffer::{BufferConfig, CopyReport, DEFAULT_CHUNK_SIZE};
pub use error::{FeedError, Result};
pub use sink::{publish, IngestPoint, IngestSink, PublishReport, SinkResponse};
pub use store::{
    FeedKind, FixedIntervalStore, Meta, MetaHeader, Point, Sample, SparseEventStore, SparseMeta,
    SparseRecord, Timestamp,
};
pub use text::{TextFormat, TextReader, TextWriter};
pub use transform::{
    AccumulatorState, DayBoundary, EnergyConfig, GapFillMerger, MergeConfig, PointWriter,
    PowerToEnergyAccumulator, PulseAccumulator, PulseConfig, ResampleConfig, Resampler,
    SpikeFilter,
};
