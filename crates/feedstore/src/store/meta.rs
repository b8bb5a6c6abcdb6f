//! Meta header for fixed-interval feeds.
//!
//! ## Binary Layout
//!
//! ```text
//! Offset  Size    Field
//! ------  ----    -----
//! 0x00    4       reserved (u32 LE, always written as 0)
//! 0x04    4       reserved (u32 LE, always written as 0)
//! 0x08    4       interval_seconds (u32 LE, > 0)
//! 0x0C    4       start_time (u32 LE, unix seconds)
//! ```

use crate::buffer::read_up_to;
use crate::error::{FeedError, Result};
use crate::store::fixed::FIXED_RECORD_LEN;
use crate::store::{FeedKind, Timestamp};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Meta header size in bytes.
pub const META_HEADER_SIZE: usize = 16;

/// Extension of the meta header file beside a `<feedid>.dat` data file.
pub const META_EXTENSION: &str = "meta";

/// Returns the meta header path for a fixed-interval data file.
pub fn meta_path_for(data_path: &Path) -> PathBuf {
    data_path.with_extension(META_EXTENSION)
}

/// The 16-byte meta header of a fixed-interval feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaHeader {
    /// Sampling interval in seconds.
    pub interval: u32,
    /// Unix time of sample 0.
    pub start_time: u32,
}

impl MetaHeader {
    /// Creates a validated header.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::InvalidInterval` if `interval` is zero.
    pub fn new(interval: u32, start_time: u32) -> Result<Self> {
        let header = Self {
            interval,
            start_time,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(FeedError::InvalidInterval(self.interval));
        }
        Ok(())
    }

    /// Encodes the header. The reserved slots are always zero.
    pub fn to_bytes(&self) -> [u8; META_HEADER_SIZE] {
        let mut buf = [0u8; META_HEADER_SIZE];
        buf[8..12].copy_from_slice(&self.interval.to_le_bytes());
        buf[12..16].copy_from_slice(&self.start_time.to_le_bytes());
        buf
    }

    /// Decodes a header, ignoring the reserved slots.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::InvalidInterval` if the stored interval is zero.
    pub fn from_bytes(buf: &[u8; META_HEADER_SIZE]) -> Result<Self> {
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self::new(word(8), word(12))
    }

    /// Writes the header to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.validate()?;
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Reads a header from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; META_HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }

    /// Loads a header from a meta file.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::ShortRead` if the file holds fewer than 16 bytes and
    /// `FeedError::InvalidInterval` if the stored interval is zero.
    pub fn load(meta_path: &Path) -> Result<Self> {
        let mut file = File::open(meta_path).map_err(|e| FeedError::file_io(meta_path, e))?;
        let mut buf = [0u8; META_HEADER_SIZE];
        let n = read_up_to(&mut file, &mut buf)?;
        if n < META_HEADER_SIZE {
            return Err(FeedError::ShortRead {
                path: meta_path.to_path_buf(),
                expected: META_HEADER_SIZE,
                actual: n,
            });
        }
        Self::from_bytes(&buf)
    }

    /// Saves the header to a meta file, replacing its contents.
    pub fn save(&self, meta_path: &Path) -> Result<()> {
        self.validate()?;
        let mut file = File::create(meta_path).map_err(|e| FeedError::file_io(meta_path, e))?;
        self.write_to(&mut file)?;
        file.sync_all()?;
        Ok(())
    }

    /// Creates an empty data file (truncating any existing one) and writes
    /// the header beside it. Returns the meta path.
    pub fn create(&self, data_path: &Path) -> Result<PathBuf> {
        self.validate()?;
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(data_path)
            .map_err(|e| FeedError::file_io(data_path, e))?;
        let meta_path = meta_path_for(data_path);
        self.save(&meta_path)?;
        Ok(meta_path)
    }
}

/// Full description of a fixed-interval feed: header plus data file size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// Feed id parsed from the `<feedid>.dat` file name, if it follows the convention.
    pub feed_id: Option<u32>,
    /// Sampling interval in seconds.
    pub interval: u32,
    /// Time of sample 0.
    pub start_time: Timestamp,
    /// Number of whole records in the data file.
    pub npoints: u64,
    /// Size of the data file in bytes. May include a partial trailing record.
    pub file_size: u64,
}

impl Meta {
    /// Builds a meta from a header and a data file size.
    pub fn from_header(header: &MetaHeader, file_size: u64, feed_id: Option<u32>) -> Self {
        Self {
            feed_id,
            interval: header.interval,
            start_time: header.start_time as Timestamp,
            npoints: file_size / FIXED_RECORD_LEN,
            file_size,
        }
    }

    /// Reads the header beside `data_path` and stats the data file.
    pub fn read(data_path: &Path) -> Result<Self> {
        let header = MetaHeader::load(&meta_path_for(data_path))?;
        let file_size = fs::metadata(data_path)
            .map_err(|e| FeedError::file_io(data_path, e))?
            .len();
        let feed_id = match FeedKind::from_path(data_path) {
            Some((FeedKind::Fixed, id)) => Some(id),
            _ => None,
        };
        Ok(Self::from_header(&header, file_size, feed_id))
    }

    /// Time just past the last whole sample: `start_time + interval * npoints`.
    pub fn end_time(&self) -> Timestamp {
        self.point_time(self.npoints)
    }

    /// Time of sample `index`, saturating at `Timestamp::MAX`.
    pub fn point_time(&self, index: u64) -> Timestamp {
        crate::store::offset_time(self.start_time, self.interval, index)
    }

    /// Header equivalent of this meta.
    pub fn header(&self) -> Result<MetaHeader> {
        MetaHeader::new(self.interval, crate::store::disk_time(self.start_time)?)
    }
}
