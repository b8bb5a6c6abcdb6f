//! Running-total transforms.
//!
//! [`PowerToEnergyAccumulator`] integrates instantaneous power (W) sampled at
//! a fixed interval into cumulative energy (kWh). [`PulseAccumulator`] sums
//! event counts. Both keep their totals in `f64` and bucket them into days
//! with [`DayTotals`].
//!
//! Neither accumulator fails on a missing or zero sample; only I/O and
//! structural errors stop a pass.

use crate::buffer::{is_same_file, BufferConfig};
use crate::error::{FeedError, Result};
use crate::store::{FixedIntervalStore, MetaHeader, Sample, Timestamp};
use crate::transform::day::{DayBoundary, DayTotals};
use crate::transform::{flush_opt, write_opt, PointWriter};
use std::path::Path;
use tracing::{debug, info};

/// Default holdover window in seconds.
pub const DEFAULT_HOLDOVER: i64 = 900;

const WATT_SECONDS_PER_KWH: f64 = 3_600_000.0;

/// Accumulator state between samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// No valid sample seen yet, or the last holdover expired.
    AwaitingSample,
    /// The last sample was valid.
    Accumulating,
    /// Missing samples within the holdover window; the last rate is assumed.
    Holdover,
}

/// Configuration for [`PowerToEnergyAccumulator`].
///
/// # Examples
/// ```rust,ignore
/// use feedstore::transform::{DayBoundary, EnergyConfig};
///
/// let config = EnergyConfig::default()
///     .with_holdover(600)
///     .with_day_boundary(DayBoundary::Utc);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyConfig {
    /// Seconds after the last valid sample during which missing samples
    /// continue at the last known rate.
    pub holdover: i64,
    /// Where days start for the daily totals.
    pub day_boundary: DayBoundary,
    /// Buffer for the output store.
    pub buffer: BufferConfig,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            holdover: DEFAULT_HOLDOVER,
            day_boundary: DayBoundary::default(),
            buffer: BufferConfig::default(),
        }
    }
}

impl EnergyConfig {
    /// Sets the holdover window.
    pub fn with_holdover(mut self, holdover: i64) -> Self {
        self.holdover = holdover;
        self
    }

    /// Sets the day boundary.
    pub fn with_day_boundary(mut self, day_boundary: DayBoundary) -> Self {
        self.day_boundary = day_boundary;
        self
    }

    /// Sets the output buffer.
    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }
}

/// Result of one [`PowerToEnergyAccumulator::update`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyStep {
    /// Sample time.
    pub time: Timestamp,
    /// Cumulative energy in kWh after this sample.
    pub total: f64,
    /// Day closed by this sample, keyed by the start of that day.
    pub closed_day: Option<(Timestamp, f64)>,
}

/// Integrates power samples into cumulative energy.
#[derive(Debug, Clone)]
pub struct PowerToEnergyAccumulator {
    interval: f64,
    holdover: i64,
    state: AccumulatorState,
    total: f64,
    increment: f64,
    last_valid: Option<Timestamp>,
    day: DayTotals,
}

impl PowerToEnergyAccumulator {
    /// Creates an accumulator for samples spaced `interval` seconds apart.
    pub fn new(interval: u32, config: &EnergyConfig) -> Self {
        Self {
            interval: interval as f64,
            holdover: config.holdover,
            state: AccumulatorState::AwaitingSample,
            total: 0.0,
            increment: 0.0,
            last_valid: None,
            day: DayTotals::new(config.day_boundary),
        }
    }

    /// Current state.
    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Cumulative energy in kWh.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Feeds the power sample taken at `time`.
    ///
    /// A valid sample adds `interval * power / 3_600_000` kWh. A missing
    /// sample less than `holdover` seconds after the last valid one repeats
    /// the last increment; later missing samples leave the total unchanged.
    pub fn update(&mut self, time: Timestamp, power: Sample) -> Result<EnergyStep> {
        let closed_day = self.day.observe(time)?;

        match power.filter(|p| !p.is_nan()) {
            Some(p) => {
                self.increment = self.interval * p as f64 / WATT_SECONDS_PER_KWH;
                self.add(self.increment);
                self.last_valid = Some(time);
                self.state = AccumulatorState::Accumulating;
            }
            None => match self.last_valid {
                Some(last) if time - last < self.holdover => {
                    self.add(self.increment);
                    self.state = AccumulatorState::Holdover;
                }
                _ => self.state = AccumulatorState::AwaitingSample,
            },
        }

        Ok(EnergyStep {
            time,
            total: self.total,
            closed_day,
        })
    }

    fn add(&mut self, kwh: f64) {
        self.total += kwh;
        self.day.add(kwh);
    }

    /// Ends the pass, returning the open day if any sample was seen.
    pub fn finish(self) -> Option<(Timestamp, f64)> {
        self.day.finish()
    }
}

/// Summary of a [`power_to_energy`] pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyReport {
    /// Samples written to the output store.
    pub npoints: u64,
    /// Final cumulative energy in kWh.
    pub total_kwh: f64,
    /// Number of daily totals emitted.
    pub days: u64,
}

/// Converts a power feed into a cumulative energy feed at `output`.
///
/// The output has the same start time, interval and number of samples as
/// the input. Daily totals go to `daily` when given.
///
/// # Errors
///
/// Returns `FeedError::DestinationConflict` if `output` resolves to the
/// input's data file, or any I/O error. The input is never opened for writing.
pub fn power_to_energy(
    input: &FixedIntervalStore,
    output: &Path,
    config: &EnergyConfig,
    mut daily: Option<&mut dyn PointWriter>,
) -> Result<EnergyReport> {
    if is_same_file(output, input.path()) {
        return Err(FeedError::DestinationConflict(output.to_path_buf()));
    }
    let header = MetaHeader::new(input.interval(), input.header().start_time)?;
    let mut out = FixedIntervalStore::create(output, header, config.buffer)?;
    let mut appender = out.appender()?;
    let mut acc = PowerToEnergyAccumulator::new(input.interval(), config);
    let mut days = 0u64;

    for point in input.points()? {
        let point = point?;
        let step = acc.update(point.time, point.value)?;
        if let Some((day, kwh)) = step.closed_day {
            write_opt(&mut daily, day, kwh)?;
            days += 1;
        }
        appender.push(Some(step.total as f32))?;
    }
    let npoints = appender.finish()?;
    let total_kwh = acc.total();
    if let Some((day, kwh)) = acc.finish() {
        write_opt(&mut daily, day, kwh)?;
        days += 1;
    }
    flush_opt(&mut daily)?;
    out.sync()?;

    info!(
        "Converted {} power samples from {} into {:.3} kWh at {}",
        npoints,
        input.path().display(),
        total_kwh,
        output.display()
    );
    Ok(EnergyReport {
        npoints,
        total_kwh,
        days,
    })
}

/// Configuration for [`PulseAccumulator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseConfig {
    /// Where days start for the daily totals.
    pub day_boundary: DayBoundary,
}

impl PulseConfig {
    /// Sets the day boundary.
    pub fn with_day_boundary(mut self, day_boundary: DayBoundary) -> Self {
        self.day_boundary = day_boundary;
        self
    }
}

/// Result of one [`PulseAccumulator::update`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseStep {
    /// Sample time.
    pub time: Timestamp,
    /// The sample if it was a nonzero count.
    pub passthrough: Option<f64>,
    /// Running total after this sample.
    pub total: f64,
    /// Day closed by this sample, keyed by the start of that day.
    pub closed_day: Option<(Timestamp, f64)>,
}

/// Sums event counts, ignoring missing and zero samples.
///
/// Never enters [`AccumulatorState::Holdover`]: a skipped sample adds nothing.
#[derive(Debug, Clone)]
pub struct PulseAccumulator {
    state: AccumulatorState,
    total: f64,
    day: DayTotals,
}

impl PulseAccumulator {
    /// Creates an empty accumulator.
    pub fn new(config: &PulseConfig) -> Self {
        Self {
            state: AccumulatorState::AwaitingSample,
            total: 0.0,
            day: DayTotals::new(config.day_boundary),
        }
    }

    /// Current state.
    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Running total.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Feeds the count taken at `time`.
    pub fn update(&mut self, time: Timestamp, count: Sample) -> Result<PulseStep> {
        let closed_day = self.day.observe(time)?;
        let passthrough = count
            .filter(|c| !c.is_nan() && *c != 0.0)
            .map(|c| c as f64);
        if let Some(c) = passthrough {
            self.total += c;
            self.day.add(c);
            self.state = AccumulatorState::Accumulating;
        }
        Ok(PulseStep {
            time,
            passthrough,
            total: self.total,
            closed_day,
        })
    }

    /// Ends the pass, returning the open day if any sample was seen.
    pub fn finish(self) -> Option<(Timestamp, f64)> {
        self.day.finish()
    }
}

/// Destinations for the three series produced by [`accumulate_pulses`].
#[derive(Default)]
pub struct PulseOutputs<'a> {
    /// Nonzero counts at their sample times. A [`SparseAppender`](crate::store::SparseAppender)
    /// stores them as events.
    pub passthrough: Option<&'a mut dyn PointWriter>,
    /// Running total at every sample time.
    pub running: Option<&'a mut dyn PointWriter>,
    /// Daily totals keyed by the start of each day.
    pub daily: Option<&'a mut dyn PointWriter>,
}

/// Summary of an [`accumulate_pulses`] pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseReport {
    /// Samples read.
    pub samples: u64,
    /// Nonzero counts passed through.
    pub events: u64,
    /// Final running total.
    pub total: f64,
    /// Number of daily totals emitted.
    pub days: u64,
}

/// Runs a [`PulseAccumulator`] over a count feed.
pub fn accumulate_pulses(
    input: &FixedIntervalStore,
    mut outputs: PulseOutputs<'_>,
    config: &PulseConfig,
) -> Result<PulseReport> {
    let mut acc = PulseAccumulator::new(config);
    let mut samples = 0u64;
    let mut events = 0u64;
    let mut days = 0u64;

    for point in input.points()? {
        let point = point?;
        let step = acc.update(point.time, point.value)?;
        samples += 1;
        if let Some((day, total)) = step.closed_day {
            write_opt(&mut outputs.daily, day, total)?;
            days += 1;
        }
        if let Some(count) = step.passthrough {
            write_opt(&mut outputs.passthrough, step.time, count)?;
            events += 1;
        }
        write_opt(&mut outputs.running, step.time, step.total)?;
    }
    let total = acc.total();
    if let Some((day, day_total)) = acc.finish() {
        write_opt(&mut outputs.daily, day, day_total)?;
        days += 1;
    }
    flush_opt(&mut outputs.passthrough)?;
    flush_opt(&mut outputs.running)?;
    flush_opt(&mut outputs.daily)?;

    debug!(
        "Accumulated {} of {} samples from {} into {} days",
        events,
        samples,
        input.path().display(),
        days
    );
    Ok(PulseReport {
        samples,
        events,
        total,
        days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::day::SECONDS_PER_DAY;

    // 2024-01-01 00:00:00 UTC
    const JAN_1: i64 = 1_704_067_200;

    fn utc_energy(holdover: i64) -> EnergyConfig {
        EnergyConfig::default()
            .with_holdover(holdover)
            .with_day_boundary(DayBoundary::Utc)
    }

    #[test]
    fn test_energy_increment() {
        let mut acc = PowerToEnergyAccumulator::new(3600, &utc_energy(900));
        assert_eq!(acc.state(), AccumulatorState::AwaitingSample);
        let step = acc.update(JAN_1, Some(1000.0)).unwrap();
        assert!((step.total - 1.0).abs() < 1e-12);
        assert_eq!(acc.state(), AccumulatorState::Accumulating);
    }

    #[test]
    fn test_energy_holdover_then_freeze() {
        let mut acc = PowerToEnergyAccumulator::new(300, &utc_energy(900));
        let start = JAN_1 + 60;
        acc.update(start, Some(1200.0)).unwrap();
        let inc = 300.0 * 1200.0 / 3_600_000.0;

        // 300s and 600s after the last valid sample: still within 900s.
        let s1 = acc.update(start + 300, None).unwrap();
        assert_eq!(acc.state(), AccumulatorState::Holdover);
        let s2 = acc.update(start + 600, None).unwrap();
        assert!((s1.total - 2.0 * inc).abs() < 1e-12);
        assert!((s2.total - 3.0 * inc).abs() < 1e-12);

        // 900s after: holdover expired, total frozen.
        let s3 = acc.update(start + 900, None).unwrap();
        assert_eq!(acc.state(), AccumulatorState::AwaitingSample);
        assert_eq!(s3.total, s2.total);
        let s4 = acc.update(start + 1200, None).unwrap();
        assert_eq!(s4.total, s2.total);

        acc.update(start + 1500, Some(0.0)).unwrap();
        assert_eq!(acc.state(), AccumulatorState::Accumulating);
    }

    #[test]
    fn test_energy_missing_before_first_sample_adds_nothing() {
        let mut acc = PowerToEnergyAccumulator::new(10, &utc_energy(900));
        let step = acc.update(JAN_1, None).unwrap();
        assert_eq!(step.total, 0.0);
        assert_eq!(acc.state(), AccumulatorState::AwaitingSample);
    }

    #[test]
    fn test_energy_day_totals() {
        let mut acc = PowerToEnergyAccumulator::new(43_200, &utc_energy(900));
        // 1000 W for 12h = 12 kWh per sample.
        let mut closed = Vec::new();
        for i in 0..4 {
            let step = acc.update(JAN_1 + 43_200 * i, Some(1000.0)).unwrap();
            closed.extend(step.closed_day);
        }
        assert_eq!(closed, vec![(JAN_1, 24.0)]);
        assert_eq!(acc.finish(), Some((JAN_1 + SECONDS_PER_DAY, 24.0)));
    }

    #[test]
    fn test_pulse_running_totals() {
        let mut acc = PulseAccumulator::new(&PulseConfig::default().with_day_boundary(DayBoundary::Utc));
        let totals: Vec<f64> = [Some(1.0), Some(0.0), None, Some(2.0)]
            .iter()
            .enumerate()
            .map(|(i, c)| acc.update(JAN_1 + i as i64 * 10, *c).unwrap().total)
            .collect();
        assert_eq!(totals, vec![1.0, 1.0, 1.0, 3.0]);
        assert_eq!(acc.state(), AccumulatorState::Accumulating);
    }

    #[test]
    fn test_pulse_passthrough_skips_zero_and_nan() {
        let mut acc = PulseAccumulator::new(&PulseConfig::default().with_day_boundary(DayBoundary::Utc));
        assert_eq!(acc.update(JAN_1, Some(0.0)).unwrap().passthrough, None);
        assert_eq!(acc.state(), AccumulatorState::AwaitingSample);
        assert_eq!(acc.update(JAN_1 + 1, Some(f32::NAN)).unwrap().passthrough, None);
        assert_eq!(acc.update(JAN_1 + 2, Some(4.0)).unwrap().passthrough, Some(4.0));
    }
}
