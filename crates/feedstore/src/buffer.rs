//! Bounded-memory chunked sequential I/O.
//!
//! Every bulk transform in this crate (copy, merge, export, import,
//! accumulation) moves bytes through a window of at most
//! [`BufferConfig::chunk_size`] bytes, independent of the store size.
//! Copies do not interpret record boundaries.

use crate::error::{FeedError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Default chunk size for buffered transforms (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Configuration for bounded buffered I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Maximum number of bytes held in memory per transfer.
    ///
    /// A value of zero is treated as one.
    pub chunk_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl BufferConfig {
    /// Creates a configuration with the given chunk size.
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Returns a copy of this configuration with a different chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Chunk size clamped to at least one byte.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

/// Summary of bytes moved by a buffered transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Number of bytes written.
    pub bytes: u64,
    /// CRC32 of the bytes written.
    pub crc32: u32,
}

/// Writer adapter that counts and checksums everything written through it.
pub struct ChecksumWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
    bytes: u64,
}

impl<W: Write> ChecksumWriter<W> {
    /// Wraps a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            bytes: 0,
        }
    }

    /// Bytes and CRC32 written so far.
    pub fn report(&self) -> CopyReport {
        CopyReport {
            bytes: self.bytes,
            crc32: self.hasher.clone().finalize(),
        }
    }

    /// Unwraps the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reads into `buf` until it is full or the reader is exhausted.
///
/// Returns the number of bytes read; a short count means end of input.
pub(crate) fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Copies everything from `reader` to `writer` in chunks of at most `chunk_size` bytes.
///
/// Returns the number of bytes copied, which always equals the number of
/// bytes read.
///
/// # Errors
///
/// Returns an error if reading or writing fails.
pub fn copy<R: Read, W: Write>(reader: &mut R, writer: &mut W, chunk_size: usize) -> Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

/// Copies a file byte for byte into a new (or truncated) destination file.
///
/// # Errors
///
/// Returns `FeedError::DestinationConflict` if both paths name the same file
/// (including through symlinks or `..` components), or an
/// I/O error naming the file that failed.
pub fn copy_file(source: &Path, destination: &Path, config: &BufferConfig) -> Result<CopyReport> {
    if is_same_file(source, destination) {
        return Err(FeedError::DestinationConflict(destination.to_path_buf()));
    }
    let mut src = File::open(source).map_err(|e| FeedError::file_io(source, e))?;
    let dst = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(destination)
        .map_err(|e| FeedError::file_io(destination, e))?;

    let mut writer = ChecksumWriter::new(dst);
    copy(&mut src, &mut writer, config.effective_chunk_size())?;
    writer.flush()?;
    let report = writer.report();
    writer.into_inner().sync_all()?;

    debug!(
        "Copied {} bytes from {} to {}",
        report.bytes,
        source.display(),
        destination.display()
    );
    Ok(report)
}

/// True if both paths resolve to the same file. A path that does not exist
/// yet only matches itself.
pub(crate) fn is_same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Copies the whole records of `source` into `writer`.
///
/// A trailing fragment shorter than `record_len` is left behind with a
/// warning. Returns the number of bytes copied.
pub fn copy_records<W: Write>(
    source: &Path,
    writer: &mut W,
    record_len: u64,
    chunk_size: usize,
) -> Result<u64> {
    let file = File::open(source).map_err(|e| FeedError::file_io(source, e))?;
    let size = file.metadata()?.len();
    let whole = size - size % record_len;
    if whole != size {
        warn!(
            "Ignoring {} trailing bytes of {}",
            size - whole,
            source.display()
        );
    }
    let copied = copy(&mut file.take(whole), writer, chunk_size)?;
    if copied != whole {
        return Err(FeedError::ShortRead {
            path: source.to_path_buf(),
            expected: whole as usize,
            actual: copied as usize,
        });
    }
    Ok(copied)
}

/// Writes `pattern` repeated `count` times, at most `chunk_size` bytes per write.
///
/// Each write holds a whole number of patterns (at least one).
pub fn fill<W: Write>(writer: &mut W, pattern: &[u8], count: u64, chunk_size: usize) -> Result<u64> {
    if pattern.is_empty() || count == 0 {
        return Ok(0);
    }
    let per_chunk = (chunk_size / pattern.len()).max(1) as u64;
    let chunk: Vec<u8> = pattern
        .iter()
        .copied()
        .cycle()
        .take(pattern.len() * per_chunk.min(count) as usize)
        .collect();

    let mut remaining = count;
    let mut written = 0u64;
    while remaining > 0 {
        let n = remaining.min(per_chunk);
        let bytes = &chunk[..pattern.len() * n as usize];
        writer.write_all(bytes)?;
        written += bytes.len() as u64;
        remaining -= n;
    }
    Ok(written)
}

/// Computes the CRC32 of a whole file using bounded reads.
pub fn file_crc32(path: &Path, chunk_size: usize) -> Result<u32> {
    let mut file = File::open(path).map_err(|e| FeedError::file_io(path, e))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        let n = read_up_to(&mut file, &mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}
