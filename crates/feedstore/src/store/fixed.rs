//! Fixed-interval store: an append-only array of `f32` samples.
//!
//! The data file has no header; sample `i` occupies bytes `[4i, 4i + 4)` and
//! its time is implicit from the meta header. A crash mid-append may leave a
//! fragment shorter than one record at the end of the file. Readers ignore
//! it and the next append overwrites it.

use crate::buffer::BufferConfig;
use crate::error::{FeedError, Result};
use crate::store::meta::{meta_path_for, Meta, MetaHeader};
use crate::store::{
    decode_sample, detect_interval, disk_time, encode_sample, offset_time, FeedKind, Point, Sample,
    Timestamp,
};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Size of one fixed-interval record in bytes.
pub const FIXED_RECORD_LEN: u64 = 4;

/// Handle to an open fixed-interval feed (data file plus meta header).
#[derive(Debug)]
pub struct FixedIntervalStore {
    path: PathBuf,
    meta_path: PathBuf,
    header: MetaHeader,
    feed_id: Option<u32>,
    file: File,
    buffer: BufferConfig,
}

impl FixedIntervalStore {
    /// Creates a new empty store, truncating any existing data file.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid or either file cannot be written.
    pub fn create(path: impl AsRef<Path>, header: MetaHeader, buffer: BufferConfig) -> Result<Self> {
        let path = path.as_ref();
        header.create(path)?;
        Self::open(path, buffer)
    }

    /// Opens an existing store for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns an error if the data file or its meta header cannot be read.
    pub fn open(path: impl AsRef<Path>, buffer: BufferConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta_path = meta_path_for(&path);
        let header = MetaHeader::load(&meta_path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| FeedError::file_io(&path, e))?;
        let feed_id = match FeedKind::from_path(&path) {
            Some((FeedKind::Fixed, id)) => Some(id),
            _ => None,
        };
        Ok(Self {
            path,
            meta_path,
            header,
            feed_id,
            file,
            buffer,
        })
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the meta header file.
    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    /// The meta header.
    pub fn header(&self) -> &MetaHeader {
        &self.header
    }

    /// Sampling interval in seconds.
    pub fn interval(&self) -> u32 {
        self.header.interval
    }

    /// Time of sample 0.
    pub fn start_time(&self) -> Timestamp {
        self.header.start_time as Timestamp
    }

    /// Buffer configuration used for bulk reads and appends.
    pub fn buffer_config(&self) -> &BufferConfig {
        &self.buffer
    }

    /// Current size of the data file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Number of whole records in the data file.
    pub fn npoints(&self) -> Result<u64> {
        Ok(self.file_size()? / FIXED_RECORD_LEN)
    }

    /// Snapshot of the full feed description.
    pub fn meta(&self) -> Result<Meta> {
        Ok(Meta::from_header(&self.header, self.file_size()?, self.feed_id))
    }

    /// Time of sample `index`: `start_time + index * interval`.
    ///
    /// Saturates at `Timestamp::MAX` for indices far past any real feed.
    pub fn point_time(&self, index: u64) -> Timestamp {
        offset_time(self.start_time(), self.interval(), index)
    }

    /// Rewrites the start time in the meta header.
    pub fn set_start_time(&mut self, start_time: Timestamp) -> Result<()> {
        let header = MetaHeader::new(self.header.interval, disk_time(start_time)?)?;
        header.save(&self.meta_path)?;
        self.header = header;
        Ok(())
    }

    /// Appends one sample at the end of the last whole record.
    pub fn append(&mut self, sample: Sample) -> Result<()> {
        let mut appender = self.appender()?;
        appender.push(sample)?;
        appender.finish()?;
        Ok(())
    }

    /// Returns a buffered appender positioned after the last whole record.
    pub fn appender(&mut self) -> Result<FixedAppender<'_>> {
        let npoints = self.npoints()?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(npoints * FIXED_RECORD_LEN))?;
        Ok(FixedAppender {
            writer: BufWriter::with_capacity(self.buffer.effective_chunk_size(), file),
            appended: 0,
        })
    }

    fn check_index(&self, index: u64) -> Result<()> {
        let npoints = self.npoints()?;
        if index >= npoints {
            return Err(FeedError::OutOfRange {
                path: self.path.clone(),
                index,
                npoints,
            });
        }
        Ok(())
    }

    /// Reads the sample at `index`.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::OutOfRange` if `index` is not a whole record.
    pub fn read_at(&self, index: u64) -> Result<Sample> {
        self.check_index(index)?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(index * FIXED_RECORD_LEN))?;
        let mut buf = [0u8; FIXED_RECORD_LEN as usize];
        file.read_exact(&mut buf)?;
        Ok(decode_sample(buf))
    }

    /// Overwrites the sample at `index` in place.
    ///
    /// Writing past the end is refused; use [`pad_to`](Self::pad_to) first.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::OutOfRange` if `index` is not a whole record.
    pub fn write_at(&mut self, index: u64, sample: Sample) -> Result<()> {
        self.check_index(index)?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(index * FIXED_RECORD_LEN))?;
        file.write_all(&encode_sample(sample))?;
        Ok(())
    }

    /// Appends missing samples until the store holds `index` records, so that
    /// `index` becomes the next append position. Returns the number appended.
    pub fn pad_to(&mut self, index: u64) -> Result<u64> {
        let npoints = self.npoints()?;
        if index <= npoints {
            return Ok(0);
        }
        let mut appender = self.appender()?;
        for _ in npoints..index {
            appender.push(None)?;
        }
        appender.finish()
    }

    /// Returns a lazy iterator over `(time, sample)` pairs in record order.
    ///
    /// Each call starts a fresh scan over the records present at call time.
    pub fn points(&self) -> Result<FixedPoints> {
        let file = File::open(&self.path).map_err(|e| FeedError::file_io(&self.path, e))?;
        Ok(FixedPoints {
            reader: BufReader::with_capacity(self.buffer.effective_chunk_size(), file),
            next_index: 0,
            npoints: self.npoints()?,
            start_time: self.start_time(),
            interval: self.interval(),
        })
    }

    /// Appends the values of an ordered point sequence. Returns the number appended.
    ///
    /// Point times are not stored; only their order matters. If the store is
    /// empty, its start time is moved to the time of the first point. With
    /// `detect` set, the interval is computed from the first three
    /// points and must match the header.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::IntervalMismatch` if detection finds irregular
    /// deltas or an interval different from the header's.
    pub fn import<I>(&mut self, points: I, detect: bool) -> Result<u64>
    where
        I: IntoIterator<Item = Result<Point>>,
    {
        let mut iter = points.into_iter();
        let mut head = Vec::with_capacity(3);
        while head.len() < 3 {
            match iter.next() {
                Some(point) => head.push(point?),
                None => break,
            }
        }

        if detect {
            match detect_interval(&head)? {
                Some(detected) if detected != self.interval() => {
                    return Err(FeedError::IntervalMismatch {
                        expected: self.interval() as i64,
                        actual: detected as i64,
                        at: head[0].time,
                    });
                }
                Some(detected) => {
                    debug!("Detected interval {}s for {}", detected, self.path.display())
                }
                None => debug!(
                    "Only {} points, keeping header interval {}s",
                    head.len(),
                    self.interval()
                ),
            }
        }

        if self.npoints()? == 0 {
            if let Some(first) = head.first() {
                if first.time != self.start_time() {
                    self.set_start_time(first.time)?;
                }
            }
        }

        let mut appender = self.appender()?;
        for point in head.into_iter().map(Ok).chain(iter) {
            appender.push(point?.value)?;
        }
        appender.finish()
    }

    /// Flushes file contents to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Buffered appender for a [`FixedIntervalStore`].
///
/// Call [`finish`](Self::finish) to flush; dropping flushes too but ignores errors.
pub struct FixedAppender<'a> {
    writer: BufWriter<&'a File>,
    appended: u64,
}

impl FixedAppender<'_> {
    /// Appends one sample.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        self.writer.write_all(&encode_sample(sample))?;
        self.appended += 1;
        Ok(())
    }

    /// Number of samples appended so far.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Flushes buffered samples and returns the number appended.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.appended)
    }
}

/// Lazy scan over the records of a [`FixedIntervalStore`].
pub struct FixedPoints {
    reader: BufReader<File>,
    next_index: u64,
    npoints: u64,
    start_time: Timestamp,
    interval: u32,
}

impl Iterator for FixedPoints {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.npoints {
            return None;
        }
        let mut buf = [0u8; FIXED_RECORD_LEN as usize];
        if let Err(e) = self.reader.read_exact(&mut buf) {
            self.next_index = self.npoints;
            return Some(Err(e.into()));
        }
        let time = self.start_time + self.interval as Timestamp * self.next_index as Timestamp;
        self.next_index += 1;
        Some(Ok(Point::new(time, decode_sample(buf))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.npoints - self.next_index) as usize;
        (remaining, Some(remaining))
    }
}
