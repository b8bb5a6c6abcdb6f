//! Sparse event store: an append-only stream of timestamped records.
//!
//! ## Binary Layout
//!
//! ```text
//! Offset  Size    Field
//! ------  ----    -----
//! 0x00    1       marker (0xF9)
//! 0x01    4       time (u32 LE, unix seconds)
//! 0x05    4       value (f32 LE)
//! ```
//!
//! Missing and exactly-zero values are never stored: for pulse-style sources
//! zero means "no event".

use crate::buffer::{read_up_to, BufferConfig};
use crate::error::{FeedError, Result};
use crate::store::{disk_time, Sample, Timestamp};
use crate::transform::PointWriter;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Marker byte opening every sparse record.
pub const SPARSE_MARKER: u8 = 0xF9;

/// Size of one sparse record in bytes.
pub const SPARSE_RECORD_LEN: usize = 9;

/// One sparse event record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseRecord {
    /// Unix time in seconds.
    pub time: Timestamp,
    /// Event value.
    pub value: f32,
}

impl SparseRecord {
    /// Creates a new record.
    pub fn new(time: Timestamp, value: f32) -> Self {
        Self { time, value }
    }

    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::InvalidTimestamp` if the time does not fit a `u32`.
    pub fn to_bytes(&self) -> Result<[u8; SPARSE_RECORD_LEN]> {
        let mut buf = [0u8; SPARSE_RECORD_LEN];
        buf[0] = SPARSE_MARKER;
        buf[1..5].copy_from_slice(&disk_time(self.time)?.to_le_bytes());
        buf[5..9].copy_from_slice(&self.value.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a record. `path` and `offset` are only used for error context.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::FormatMismatch` if the marker byte is wrong.
    pub fn from_bytes(buf: &[u8; SPARSE_RECORD_LEN], path: &Path, offset: u64) -> Result<Self> {
        if buf[0] != SPARSE_MARKER {
            return Err(FeedError::FormatMismatch {
                path: path.to_path_buf(),
                offset,
                found: buf[0],
            });
        }
        let time = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let value = f32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
        Ok(Self {
            time: time as Timestamp,
            value,
        })
    }
}

/// Returns the value if it should be stored as an event.
fn is_event(value: Sample) -> Option<f32> {
    value.filter(|v| !v.is_nan() && *v != 0.0)
}

/// Summary of a sparse store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseMeta {
    /// Number of whole records.
    pub npoints: u64,
    /// Time of the first record.
    pub start_time: Option<Timestamp>,
    /// Time of the last whole record.
    pub end_time: Option<Timestamp>,
    /// Size of the file in bytes.
    pub file_size: u64,
}

/// Handle to an open sparse event feed.
#[derive(Debug)]
pub struct SparseEventStore {
    path: PathBuf,
    file: File,
    buffer: BufferConfig,
}

impl SparseEventStore {
    /// Creates a new empty store, truncating any existing file.
    pub fn create(path: impl AsRef<Path>, buffer: BufferConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| FeedError::file_io(&path, e))?;
        Ok(Self { path, file, buffer })
    }

    /// Opens an existing store. A non-empty file must start with a valid record.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::FormatMismatch` or `FeedError::ShortRead` if the
    /// file does not look like a sparse store.
    pub fn open(path: impl AsRef<Path>, buffer: BufferConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| FeedError::file_io(&path, e))?;
        if file.metadata()?.len() > 0 {
            Self::detect_format(&path)?;
        }
        Ok(Self { path, file, buffer })
    }

    /// Checks that the file at `path` starts with a sparse record.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::ShortRead` if fewer than 9 bytes are available and
    /// `FeedError::FormatMismatch` if the marker byte is wrong.
    pub fn detect_format(path: &Path) -> Result<()> {
        let mut file = File::open(path).map_err(|e| FeedError::file_io(path, e))?;
        let mut buf = [0u8; SPARSE_RECORD_LEN];
        let n = read_up_to(&mut file, &mut buf)?;
        if n < SPARSE_RECORD_LEN {
            return Err(FeedError::ShortRead {
                path: path.to_path_buf(),
                expected: SPARSE_RECORD_LEN,
                actual: n,
            });
        }
        SparseRecord::from_bytes(&buf, path, 0).map(|_| ())
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer configuration used for bulk reads and appends.
    pub fn buffer_config(&self) -> &BufferConfig {
        &self.buffer
    }

    /// Current size of the file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Number of whole records.
    pub fn npoints(&self) -> Result<u64> {
        Ok(self.file_size()? / SPARSE_RECORD_LEN as u64)
    }

    /// Reads the first and last whole records to summarise the store.
    pub fn meta(&self) -> Result<SparseMeta> {
        let file_size = self.file_size()?;
        let npoints = file_size / SPARSE_RECORD_LEN as u64;
        let (start_time, end_time) = if npoints == 0 {
            (None, None)
        } else {
            (
                Some(self.read_at(0)?.time),
                Some(self.read_at(npoints - 1)?.time),
            )
        };
        Ok(SparseMeta {
            npoints,
            start_time,
            end_time,
            file_size,
        })
    }

    /// Appends an event. Missing and zero values are skipped.
    ///
    /// Returns whether a record was written.
    pub fn append(&mut self, time: Timestamp, value: Sample) -> Result<bool> {
        let mut appender = self.appender()?;
        let written = appender.push(time, value)?;
        appender.finish()?;
        Ok(written)
    }

    /// Returns a buffered appender positioned after the last whole record.
    pub fn appender(&mut self) -> Result<SparseAppender<'_>> {
        let npoints = self.npoints()?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(npoints * SPARSE_RECORD_LEN as u64))?;
        Ok(SparseAppender {
            writer: BufWriter::with_capacity(self.buffer.effective_chunk_size(), file),
            appended: 0,
            skipped: 0,
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

    /// Reads the record at `index`.
    pub fn read_at(&self, index: u64) -> Result<SparseRecord> {
        self.check_index(index)?;
        let offset = index * SPARSE_RECORD_LEN as u64;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; SPARSE_RECORD_LEN];
        file.read_exact(&mut buf)?;
        SparseRecord::from_bytes(&buf, &self.path, offset)
    }

    /// Overwrites the record at `index` in place.
    pub fn write_at(&mut self, index: u64, record: SparseRecord) -> Result<()> {
        self.check_index(index)?;
        let bytes = record.to_bytes()?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(index * SPARSE_RECORD_LEN as u64))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Returns a lazy iterator over all records in file order.
    ///
    /// A trailing fragment shorter than one record yields
    /// `FeedError::TruncatedRecord` and ends the scan.
    pub fn records(&self) -> Result<SparseRecords> {
        let file = File::open(&self.path).map_err(|e| FeedError::file_io(&self.path, e))?;
        Ok(SparseRecords {
            reader: BufReader::with_capacity(self.buffer.effective_chunk_size(), file),
            path: self.path.clone(),
            offset: 0,
            done: false,
        })
    }

    /// Flushes file contents to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Buffered appender for a [`SparseEventStore`].
pub struct SparseAppender<'a> {
    writer: BufWriter<&'a File>,
    appended: u64,
    skipped: u64,
}

impl SparseAppender<'_> {
    /// Appends an event unless it is missing or zero. Returns whether it was written.
    pub fn push(&mut self, time: Timestamp, value: Sample) -> Result<bool> {
        let Some(value) = is_event(value) else {
            self.skipped += 1;
            return Ok(false);
        };
        self.writer
            .write_all(&SparseRecord::new(time, value).to_bytes()?)?;
        self.appended += 1;
        Ok(true)
    }

    /// Number of records written so far.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Number of missing or zero values skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Flushes buffered records and returns the number written.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.appended)
    }
}

impl PointWriter for SparseAppender<'_> {
    fn write_point(&mut self, time: Timestamp, value: f64) -> Result<()> {
        self.push(time, Some(value as f32)).map(|_| ())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Lazy scan over the records of a [`SparseEventStore`].
pub struct SparseRecords {
    reader: BufReader<File>,
    path: PathBuf,
    offset: u64,
    done: bool,
}

impl Iterator for SparseRecords {
    type Item = Result<SparseRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = [0u8; SPARSE_RECORD_LEN];
        let n = match read_up_to(&mut self.reader, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if n == 0 {
            self.done = true;
            return None;
        }
        if n < SPARSE_RECORD_LEN {
            self.done = true;
            return Some(Err(FeedError::TruncatedRecord {
                path: self.path.clone(),
                offset: self.offset,
                len: n,
            }));
        }
        let record = SparseRecord::from_bytes(&buf, &self.path, self.offset);
        if record.is_err() {
            self.done = true;
        }
        self.offset += SPARSE_RECORD_LEN as u64;
        Some(record)
    }
}
