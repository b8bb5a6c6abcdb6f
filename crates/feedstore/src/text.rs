//! Line-oriented text interchange.
//!
//! Each line is `<unixtime><delimiter><value>`. In verbose mode a
//! human-readable local timestamp column is written first:
//!
//! ```text
//! Mon Jan  1 00:00:00 2024,1704067200,21.5
//! ```
//!
//! Readers take the last two columns as time and value, so verbose and plain
//! dumps load the same way. A value of `nan` (any case) is a missing sample.

use crate::buffer::BufferConfig;
use crate::error::{FeedError, Result};
use crate::store::{
    detect_interval, disk_time, FixedIntervalStore, MetaHeader, Point, Sample, SparseEventStore,
    Timestamp,
};
use crate::transform::PointWriter;
use chrono::{Local, TimeZone};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Text written for a missing sample.
pub const MISSING: &str = "nan";

const CTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Text interchange settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextFormat {
    /// Column separator.
    pub delimiter: char,
    /// Prefix each line with a human-readable timestamp.
    pub verbose: bool,
}

impl Default for TextFormat {
    fn default() -> Self {
        Self {
            delimiter: ',',
            verbose: false,
        }
    }
}

impl TextFormat {
    /// Sets the delimiter.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Enables or disables the timestamp column.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        if self.delimiter.is_whitespace() {
            line.split_whitespace().collect()
        } else {
            line.split(self.delimiter).map(str::trim).collect()
        }
    }
}

/// Writes points as text lines.
pub struct TextWriter<W: Write> {
    inner: W,
    format: TextFormat,
    lines: u64,
}

impl<W: Write> TextWriter<W> {
    /// Wraps a writer.
    pub fn new(inner: W, format: TextFormat) -> Self {
        Self {
            inner,
            format,
            lines: 0,
        }
    }

    /// Writes one sample.
    pub fn write_sample(&mut self, time: Timestamp, sample: Sample) -> Result<()> {
        match sample.filter(|v| !v.is_nan()) {
            Some(v) => self.write_line(time, v),
            None => self.write_line(time, MISSING),
        }
    }

    fn write_line<V: std::fmt::Display>(&mut self, time: Timestamp, value: V) -> Result<()> {
        let d = self.format.delimiter;
        if self.format.verbose {
            let stamp = Local
                .timestamp_opt(time, 0)
                .single()
                .ok_or(FeedError::InvalidTimestamp(time))?;
            write!(self.inner, "{}{}", stamp.format(CTIME_FORMAT), d)?;
        }
        writeln!(self.inner, "{}{}{}", time, d, value)?;
        self.lines += 1;
        Ok(())
    }

    /// Number of lines written.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Flushes and returns the inner writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> PointWriter for TextWriter<W> {
    fn write_point(&mut self, time: Timestamp, value: f64) -> Result<()> {
        if value.is_nan() {
            self.write_line(time, MISSING)
        } else {
            self.write_line(time, value)
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Parses text lines into points.
pub struct TextReader<R: BufRead> {
    inner: R,
    format: TextFormat,
    line: String,
    line_no: usize,
    done: bool,
}

impl<R: BufRead> TextReader<R> {
    /// Wraps a buffered reader.
    pub fn new(inner: R, format: TextFormat) -> Self {
        Self {
            inner,
            format,
            line: String::new(),
            line_no: 0,
            done: false,
        }
    }

    /// Number of lines consumed so far, blank ones included.
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    fn parse_line(&self) -> Result<Option<Point>> {
        let text = self.line.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let columns = self.format.split(text);
        let [.., time, value] = columns.as_slice() else {
            return Err(self.error(format!("expected 2 columns, found {}", columns.len())));
        };
        let time = parse_time(time).ok_or_else(|| self.error(format!("bad time {:?}", time)))?;
        let value = if value.eq_ignore_ascii_case(MISSING) {
            None
        } else {
            let v: f32 = value
                .parse()
                .map_err(|_| self.error(format!("bad value {:?}", value)))?;
            Some(v).filter(|v| !v.is_nan())
        };
        Ok(Some(Point::new(time, value)))
    }

    fn error(&self, reason: String) -> FeedError {
        FeedError::Parse {
            line: self.line_no,
            reason,
        }
    }
}

fn parse_time(s: &str) -> Option<Timestamp> {
    if let Ok(t) = s.parse::<Timestamp>() {
        return Some(t);
    }
    let t: f64 = s.parse().ok()?;
    (t.is_finite() && t.fract() == 0.0).then_some(t as Timestamp)
}

impl<R: BufRead> Iterator for TextReader<R> {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            match self.inner.read_line(&mut self.line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_no += 1;
                    match self.parse_line() {
                        Ok(Some(point)) => return Some(Ok(point)),
                        Ok(None) => continue,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}

/// Writes every sample of a fixed-interval store. Returns the line count.
pub fn dump_fixed<W: Write>(store: &FixedIntervalStore, out: W, format: TextFormat) -> Result<u64> {
    let chunk_size = store.buffer_config().effective_chunk_size();
    let mut writer = TextWriter::new(BufWriter::with_capacity(chunk_size, out), format);
    for point in store.points()? {
        let point = point?;
        writer.write_sample(point.time, point.value)?;
    }
    let lines = writer.lines();
    writer.into_inner()?;
    debug!("Dumped {} samples from {}", lines, store.path().display());
    Ok(lines)
}

/// Writes every record of a sparse store. Returns the line count.
///
/// # Errors
///
/// Stops at the first corrupt or truncated record with that record's error.
pub fn dump_sparse<W: Write>(store: &SparseEventStore, out: W, format: TextFormat) -> Result<u64> {
    let chunk_size = store.buffer_config().effective_chunk_size();
    let mut writer = TextWriter::new(BufWriter::with_capacity(chunk_size, out), format);
    for record in store.records()? {
        let record = record?;
        writer.write_sample(record.time, Some(record.value))?;
    }
    let lines = writer.lines();
    writer.into_inner()?;
    debug!("Dumped {} records from {}", lines, store.path().display());
    Ok(lines)
}

/// Creates a fixed-interval store at `path` from text.
///
/// The start time is the time of the first line. With `interval` given, the
/// interval detected from the first three lines must match it; otherwise the
/// detected interval is used. Nothing is created if the interval is wrong.
///
/// # Errors
///
/// Returns `FeedError::IntervalMismatch` on a detected mismatch,
/// `FeedError::InvalidInterval` if no interval is given and fewer than three
/// lines exist, and `FeedError::Parse` for malformed lines.
pub fn load_fixed<R: BufRead>(
    input: R,
    path: &Path,
    format: TextFormat,
    interval: Option<u32>,
    buffer: BufferConfig,
) -> Result<FixedIntervalStore> {
    let mut reader = TextReader::new(input, format);
    let mut head = Vec::with_capacity(3);
    while head.len() < 3 {
        match reader.next() {
            Some(point) => head.push(point?),
            None => break,
        }
    }

    let interval = match (interval, detect_interval(&head)?) {
        (Some(given), Some(detected)) if given != detected => {
            return Err(FeedError::IntervalMismatch {
                expected: given as i64,
                actual: detected as i64,
                at: head[0].time,
            });
        }
        (Some(given), _) => given,
        (None, Some(detected)) => detected,
        (None, None) => return Err(FeedError::InvalidInterval(0)),
    };
    let start_time = match head.first() {
        Some(point) => disk_time(point.time)?,
        None => 0,
    };

    let mut store = FixedIntervalStore::create(path, MetaHeader::new(interval, start_time)?, buffer)?;
    let appended = store.import(head.into_iter().map(Ok).chain(reader), false)?;
    debug!(
        "Loaded {} samples at {}s into {}",
        appended,
        interval,
        path.display()
    );
    Ok(store)
}

/// Creates a sparse store at `path` from text. Missing and zero values are skipped.
pub fn load_sparse<R: BufRead>(
    input: R,
    path: &Path,
    format: TextFormat,
    buffer: BufferConfig,
) -> Result<SparseEventStore> {
    let mut store = SparseEventStore::create(path, buffer)?;
    let mut appender = store.appender()?;
    for point in TextReader::new(input, format) {
        let point = point?;
        appender.push(point.time, point.value)?;
    }
    let skipped = appender.skipped();
    let appended = appender.finish()?;
    debug!(
        "Loaded {} events into {} ({} skipped)",
        appended,
        path.display(),
        skipped
    );
    Ok(store)
}
