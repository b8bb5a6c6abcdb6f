//! Gap-filling concatenation of two fixed-interval feeds.
//!
//! A fixed-interval feed has no per-sample timestamps, so two recordings of
//! the same sensor separated by an outage can only be joined by inserting
//! missing samples for the outage. The merge never writes to the destination
//! until every precondition holds: output goes to a temporary file that is
//! renamed into place once complete.

use crate::buffer::{copy_records, fill, is_same_file, BufferConfig, ChecksumWriter, CopyReport};
use crate::error::{FeedError, Result};
use crate::store::{encode_sample, meta_path_for, Meta, MetaHeader, Timestamp, FIXED_RECORD_LEN};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default ceiling for the gap between two merged feeds (10 days).
pub const DEFAULT_MAX_GAP: i64 = 864_000;

/// Merge configuration.
///
/// # Examples
/// ```rust,ignore
/// use feedstore::transform::MergeConfig;
///
/// let config = MergeConfig::default().with_max_gap(30 * 86_400);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeConfig {
    /// Largest allowed gap in seconds between the end of the older feed and
    /// the start of the newer one.
    pub max_gap: i64,
    /// Buffer used for copying and filling.
    pub buffer: BufferConfig,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_gap: DEFAULT_MAX_GAP,
            buffer: BufferConfig::default(),
        }
    }
}

impl MergeConfig {
    /// Sets the gap ceiling.
    pub fn with_max_gap(mut self, max_gap: i64) -> Self {
        self.max_gap = max_gap;
        self
    }

    /// Sets the buffer configuration.
    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }
}

/// A validated merge of two feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    /// Data file of the earlier feed.
    pub old_path: PathBuf,
    /// Description of the earlier feed.
    pub old: Meta,
    /// Data file of the later feed.
    pub new_path: PathBuf,
    /// Description of the later feed.
    pub new: Meta,
    /// `new.start_time - old.end_time()`, in seconds.
    pub gap: i64,
    /// Number of missing samples inserted between the two feeds.
    pub filler: u64,
}

impl MergePlan {
    /// Shared sampling interval.
    pub fn interval(&self) -> u32 {
        self.old.interval
    }

    /// Number of samples in the merged feed.
    pub fn npoints(&self) -> u64 {
        self.old.npoints + self.filler + self.new.npoints
    }
}

/// Outcome of a completed merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    /// Description of the merged feed, read back from disk.
    pub meta: Meta,
    /// Bytes and CRC32 of the merged data file.
    pub report: CopyReport,
    /// Number of missing samples inserted.
    pub filler: u64,
}

/// Joins two fixed-interval feeds into a new one.
#[derive(Debug, Clone, Default)]
pub struct GapFillMerger {
    config: MergeConfig,
}

impl GapFillMerger {
    /// Creates a merger.
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// The merge configuration.
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Reads both feeds' metadata and validates the merge.
    ///
    /// The inputs may be given in either order; the feed with the earlier
    /// start time becomes `old`.
    ///
    /// # Errors
    ///
    /// - `FeedError::Duplicate` if both feeds start at the same time.
    /// - `FeedError::IntervalMismatch` if the intervals differ.
    /// - `FeedError::Overlap` if the older feed ends at or after the newer one starts.
    /// - `FeedError::GapTooLarge` if the gap exceeds [`MergeConfig::max_gap`].
    pub fn plan(&self, a: &Path, b: &Path) -> Result<MergePlan> {
        let meta_a = Meta::read(a)?;
        let meta_b = Meta::read(b)?;

        if meta_a.start_time == meta_b.start_time {
            return Err(FeedError::Duplicate {
                start_time: meta_a.start_time,
            });
        }
        let ((old_path, old), (new_path, new)) = if meta_a.start_time < meta_b.start_time {
            ((a, meta_a), (b, meta_b))
        } else {
            ((b, meta_b), (a, meta_a))
        };

        if old.interval != new.interval {
            return Err(FeedError::IntervalMismatch {
                expected: old.interval as i64,
                actual: new.interval as i64,
                at: new.start_time,
            });
        }
        let old_end = old.end_time();
        if old_end >= new.start_time {
            return Err(FeedError::Overlap {
                old_end,
                new_start: new.start_time,
            });
        }
        let gap = new.start_time - old_end;
        if gap > self.config.max_gap {
            return Err(FeedError::GapTooLarge {
                gap,
                max_gap: self.config.max_gap,
            });
        }

        let interval = old.interval as Timestamp;
        if gap % interval != 0 {
            warn!(
                "Gap of {}s between {} and {} is not a multiple of the {}s interval",
                gap,
                old_path.display(),
                new_path.display(),
                interval
            );
        }
        let filler = (gap / interval).saturating_sub(1) as u64;

        Ok(MergePlan {
            old_path: old_path.to_path_buf(),
            old,
            new_path: new_path.to_path_buf(),
            new,
            gap,
            filler,
        })
    }

    /// Merges two feeds into `destination` and writes its meta header.
    ///
    /// # Errors
    ///
    /// Any error from [`plan`](Self::plan), or
    /// `FeedError::DestinationConflict` if `destination` is one of the inputs.
    /// On error no destination file is created.
    pub fn merge(&self, a: &Path, b: &Path, destination: &Path) -> Result<MergeResult> {
        if is_same_file(destination, a) || is_same_file(destination, b) {
            return Err(FeedError::DestinationConflict(destination.to_path_buf()));
        }
        let plan = self.plan(a, b)?;

        info!(
            "Merging {} [{}..{}) and {} [{}..{}) into {}",
            plan.old_path.display(),
            plan.old.start_time,
            plan.old.end_time(),
            plan.new_path.display(),
            plan.new.start_time,
            plan.new.end_time(),
            destination.display()
        );
        debug!(
            "Gap {}s, {} filler samples ({} bytes)",
            plan.gap,
            plan.filler,
            plan.filler * FIXED_RECORD_LEN
        );

        let tmp_path = destination.with_extension("dat.tmp");
        let report = match self.write_merged(&plan, &tmp_path) {
            Ok(report) => report,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        let meta_path = meta_path_for(destination);
        let meta_tmp_path = meta_path.with_extension("meta.tmp");
        let saved = plan
            .old
            .header()
            .and_then(|h| MetaHeader::new(plan.interval(), h.start_time))
            .and_then(|header| header.save(&meta_tmp_path));
        if let Err(e) = saved {
            let _ = fs::remove_file(&tmp_path);
            let _ = fs::remove_file(&meta_tmp_path);
            return Err(e);
        }

        // The data file lands first; a failed meta rename takes it back out.
        if let Err(e) = fs::rename(&tmp_path, destination) {
            let _ = fs::remove_file(&tmp_path);
            let _ = fs::remove_file(&meta_tmp_path);
            return Err(FeedError::file_io(destination, e));
        }
        if let Err(e) = fs::rename(&meta_tmp_path, &meta_path) {
            let _ = fs::remove_file(destination);
            let _ = fs::remove_file(&meta_tmp_path);
            return Err(FeedError::file_io(&meta_path, e));
        }

        let meta = Meta::read(destination)?;
        info!(
            "Merged feed {} holds {} samples",
            destination.display(),
            meta.npoints
        );
        Ok(MergeResult {
            meta,
            report,
            filler: plan.filler,
        })
    }

    fn write_merged(&self, plan: &MergePlan, tmp_path: &Path) -> Result<CopyReport> {
        let chunk_size = self.config.buffer.effective_chunk_size();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)
            .map_err(|e| FeedError::file_io(tmp_path, e))?;
        let mut writer = ChecksumWriter::new(BufWriter::with_capacity(chunk_size, file));

        copy_records(&plan.old_path, &mut writer, FIXED_RECORD_LEN, chunk_size)?;
        fill(&mut writer, &encode_sample(None), plan.filler, chunk_size)?;
        copy_records(&plan.new_path, &mut writer, FIXED_RECORD_LEN, chunk_size)?;

        writer.flush()?;
        let report = writer.report();
        let file = writer.into_inner().into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FixedIntervalStore;
    use tempfile::TempDir;

    fn make_feed(dir: &TempDir, name: &str, start: u32, interval: u32, n: usize) -> PathBuf {
        let path = dir.path().join(name);
        let header = MetaHeader::new(interval, start).unwrap();
        let mut store = FixedIntervalStore::create(&path, header, BufferConfig::new(8)).unwrap();
        let mut appender = store.appender().unwrap();
        for i in 0..n {
            appender.push(Some(i as f32)).unwrap();
        }
        appender.finish().unwrap();
        path
    }

    #[test]
    fn test_plan_orders_inputs() {
        let temp_dir = TempDir::new().unwrap();
        let a = make_feed(&temp_dir, "1.dat", 1000, 10, 10);
        let b = make_feed(&temp_dir, "2.dat", 1200, 10, 5);

        let merger = GapFillMerger::default();
        let plan = merger.plan(&b, &a).unwrap();
        assert_eq!(plan.old_path, a);
        assert_eq!(plan.gap, 100);
        assert_eq!(plan.filler, 9);
        assert_eq!(plan.npoints(), 24);
    }

    #[test]
    fn test_plan_interval_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let a = make_feed(&temp_dir, "1.dat", 1000, 10, 10);
        let b = make_feed(&temp_dir, "2.dat", 1200, 20, 5);

        assert!(matches!(
            GapFillMerger::default().plan(&a, &b),
            Err(FeedError::IntervalMismatch {
                expected: 10,
                actual: 20,
                at: 1200
            })
        ));
    }

    #[test]
    fn test_adjacent_gap_needs_no_filler() {
        let temp_dir = TempDir::new().unwrap();
        let a = make_feed(&temp_dir, "1.dat", 1000, 10, 10);
        let b = make_feed(&temp_dir, "2.dat", 1110, 10, 3);

        let plan = GapFillMerger::default().plan(&a, &b).unwrap();
        assert_eq!(plan.gap, 10);
        assert_eq!(plan.filler, 0);
    }

    #[test]
    fn test_misaligned_gap_floors_filler() {
        let temp_dir = TempDir::new().unwrap();
        let a = make_feed(&temp_dir, "1.dat", 1000, 10, 10);
        let b = make_feed(&temp_dir, "2.dat", 1135, 10, 3);

        let plan = GapFillMerger::default().plan(&a, &b).unwrap();
        assert_eq!(plan.gap, 35);
        assert_eq!(plan.filler, 2);
    }

    #[test]
    fn test_merge_to_input_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let a = make_feed(&temp_dir, "1.dat", 1000, 10, 10);
        let b = make_feed(&temp_dir, "2.dat", 1200, 10, 5);
        let before = fs::read(&a).unwrap();

        let result = GapFillMerger::default().merge(&a, &b, &a);
        assert!(matches!(result, Err(FeedError::DestinationConflict(_))));
        assert_eq!(fs::read(&a).unwrap(), before);
    }

    #[test]
    fn test_merge_removes_tmp_file() {
        let temp_dir = TempDir::new().unwrap();
        let a = make_feed(&temp_dir, "1.dat", 1000, 10, 10);
        let b = make_feed(&temp_dir, "2.dat", 1200, 10, 5);
        let dest = temp_dir.path().join("3.dat");

        let result = GapFillMerger::new(MergeConfig::default().with_buffer(BufferConfig::new(3)))
            .merge(&a, &b, &dest)
            .unwrap();
        assert_eq!(result.meta.npoints, 24);
        assert_eq!(result.report.bytes, 96);
        assert!(!temp_dir.path().join("3.dat.tmp").exists());
    }
}
