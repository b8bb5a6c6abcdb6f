//! Point-sequence filters: spike removal and interval resampling.

use crate::error::{FeedError, Result};
use crate::store::{detect_interval, Point, Sample, Timestamp};
use std::collections::VecDeque;
use tracing::debug;

/// Default lower spike threshold.
pub const DEFAULT_SPIKE_MIN: f32 = 0.0;

/// Default upper spike threshold.
pub const DEFAULT_SPIKE_MAX: f32 = 850.0;

/// Marks values outside the open range `(min, max)` as missing.
///
/// The defaults reject the out-of-range readings typical of one-wire
/// temperature sensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeFilter {
    /// Values at or below this become missing.
    pub min: f32,
    /// Values at or above this become missing.
    pub max: f32,
}

impl Default for SpikeFilter {
    fn default() -> Self {
        Self {
            min: DEFAULT_SPIKE_MIN,
            max: DEFAULT_SPIKE_MAX,
        }
    }
}

impl SpikeFilter {
    /// Creates a filter with explicit thresholds.
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Filters one sample.
    pub fn apply(&self, sample: Sample) -> Sample {
        sample.filter(|v| !v.is_nan() && *v > self.min && *v < self.max)
    }

    /// Filters a point sequence lazily.
    pub fn filter<I>(self, points: I) -> impl Iterator<Item = Result<Point>>
    where
        I: IntoIterator<Item = Result<Point>>,
    {
        points
            .into_iter()
            .map(move |point| point.map(|p| Point::new(p.time, self.apply(p.value))))
    }
}

/// Configuration for [`Resampler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResampleConfig {
    /// Target interval in seconds; must be a multiple of the source interval.
    pub interval: u32,
    /// Round each group average to the nearest integer.
    pub round: bool,
    /// Spike filter applied to source samples before averaging.
    pub spike: Option<SpikeFilter>,
}

impl ResampleConfig {
    /// Creates a configuration for the given target interval.
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            round: false,
            spike: None,
        }
    }

    /// Enables or disables rounding of group averages.
    pub fn with_round(mut self, round: bool) -> Self {
        self.round = round;
        self
    }

    /// Applies a spike filter before averaging.
    pub fn with_spike_filter(mut self, spike: SpikeFilter) -> Self {
        self.spike = Some(spike);
        self
    }
}

/// Averages fixed-size groups of a regularly spaced sequence into a coarser one.
///
/// Each output point is stamped with the time of the last slot of its group.
/// Missing samples do not contribute to the average; a group with no samples
/// is missing. A trailing incomplete group is dropped.
pub struct Resampler<I> {
    source: I,
    head: VecDeque<Point>,
    first_time: Timestamp,
    source_interval: u32,
    config: ResampleConfig,
    factor: u32,
    groups: i64,
    done: bool,
}

impl<I> Resampler<I>
where
    I: Iterator<Item = Result<Point>>,
{
    /// Wraps a sequence, detecting its interval from the first three points.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::IntervalMismatch` if the source deltas are
    /// irregular and `FeedError::InvalidInterval` if the source interval
    /// cannot be detected or the target is not a positive multiple of it.
    pub fn new<S>(source: S, config: ResampleConfig) -> Result<Self>
    where
        S: IntoIterator<IntoIter = I>,
    {
        let mut source = source.into_iter();
        let mut head = Vec::with_capacity(3);
        while head.len() < 3 {
            match source.next() {
                Some(point) => head.push(point?),
                None => break,
            }
        }
        let source_interval = match detect_interval(&head)? {
            Some(interval) => interval,
            None if head.is_empty() => {
                return Ok(Self::exhausted(source, config));
            }
            None => return Err(FeedError::InvalidInterval(0)),
        };
        if config.interval < source_interval || config.interval % source_interval != 0 {
            return Err(FeedError::InvalidInterval(config.interval));
        }
        debug!(
            "Resampling from {}s to {}s",
            source_interval, config.interval
        );
        Ok(Self {
            source,
            first_time: head[0].time,
            head: head.into(),
            source_interval,
            config,
            factor: config.interval / source_interval,
            groups: 0,
            done: false,
        })
    }

    fn exhausted(source: I, config: ResampleConfig) -> Self {
        Self {
            source,
            head: VecDeque::new(),
            first_time: 0,
            source_interval: config.interval,
            config,
            factor: 1,
            groups: 0,
            done: true,
        }
    }

    /// Detected interval of the source sequence.
    pub fn source_interval(&self) -> u32 {
        self.source_interval
    }

    /// Number of source samples per output point.
    pub fn factor(&self) -> u32 {
        self.factor
    }
}

impl<I> Iterator for Resampler<I>
where
    I: Iterator<Item = Result<Point>>,
{
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut sum = 0.0f64;
        let mut count = 0u32;
        for slot in 0..self.factor {
            let point = match self.head.pop_front() {
                Some(point) => point,
                None => match self.source.next() {
                    Some(Ok(point)) => point,
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    None => {
                        self.done = true;
                        if slot > 0 {
                            debug!("Dropping incomplete trailing group of {} samples", slot);
                        }
                        return None;
                    }
                },
            };
            let value = match &self.config.spike {
                Some(spike) => spike.apply(point.value),
                None => point.value,
            };
            if let Some(v) = value.filter(|v| !v.is_nan()) {
                sum += v as f64;
                count += 1;
            }
        }

        self.groups += 1;
        let time = self.first_time - self.source_interval as Timestamp
            + self.config.interval as Timestamp * self.groups;
        let value = (count > 0).then(|| {
            let avg = sum / count as f64;
            if self.config.round {
                avg.round() as f32
            } else {
                avg as f32
            }
        });
        Some(Ok(Point::new(time, value)))
    }
}
