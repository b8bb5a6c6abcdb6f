//! Sequential transforms over feed stores.
//!
//! - [`merge`]: gap-filling concatenation of two fixed-interval feeds.
//! - [`accumulate`]: power-to-energy and pulse running totals.
//! - [`filter`]: spike removal and interval resampling of point sequences.
//! - [`day`]: local-midnight day bucketing shared by the accumulators.
//!
//! Transforms that emit secondary series write them through a
//! [`PointWriter`], so the same pass can feed a text export, a sparse store
//! or an in-memory buffer.

pub mod accumulate;
pub mod day;
pub mod filter;
pub mod merge;

pub use accumulate::{
    accumulate_pulses, power_to_energy, AccumulatorState, EnergyConfig, EnergyReport, EnergyStep,
    PowerToEnergyAccumulator, PulseAccumulator, PulseConfig, PulseOutputs, PulseReport, PulseStep,
    DEFAULT_HOLDOVER,
};
pub use day::{DayBoundary, DayTotals, SECONDS_PER_DAY};
pub use filter::{ResampleConfig, Resampler, SpikeFilter};
pub use merge::{GapFillMerger, MergeConfig, MergePlan, MergeResult, DEFAULT_MAX_GAP};

use crate::error::Result;
use crate::store::Timestamp;

/// Destination for a derived `(time, value)` series.
pub trait PointWriter {
    /// Writes one point. A NaN value denotes a missing sample.
    fn write_point(&mut self, time: Timestamp, value: f64) -> Result<()>;

    /// Flushes buffered output.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl PointWriter for Vec<(Timestamp, f64)> {
    fn write_point(&mut self, time: Timestamp, value: f64) -> Result<()> {
        self.push((time, value));
        Ok(())
    }
}

impl<P: PointWriter + ?Sized> PointWriter for &mut P {
    fn write_point(&mut self, time: Timestamp, value: f64) -> Result<()> {
        (**self).write_point(time, value)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Writes to an optional destination, doing nothing when it is absent.
pub(crate) fn write_opt(
    writer: &mut Option<&mut dyn PointWriter>,
    time: Timestamp,
    value: f64,
) -> Result<()> {
    match writer {
        Some(w) => w.write_point(time, value),
        None => Ok(()),
    }
}

/// Flushes an optional destination.
pub(crate) fn flush_opt(writer: &mut Option<&mut dyn PointWriter>) -> Result<()> {
    match writer {
        Some(w) => w.flush(),
        None => Ok(()),
    }
}
