//! Integration tests for gap-filling merge.

use feedstore::store::{FixedIntervalStore, MetaHeader};
use feedstore::transform::{GapFillMerger, MergeConfig};
use feedstore::{BufferConfig, FeedError, Sample};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_feed(dir: &Path, name: &str, start: u32, interval: u32, values: &[Sample]) -> PathBuf {
    let path = dir.join(name);
    let header = MetaHeader::new(interval, start).unwrap();
    let mut store = FixedIntervalStore::create(&path, header, BufferConfig::default()).unwrap();
    let mut appender = store.appender().unwrap();
    for v in values {
        appender.push(*v).unwrap();
    }
    appender.finish().unwrap();
    path
}

fn ramp(n: usize, offset: f32) -> Vec<Sample> {
    (0..n).map(|i| Some(offset + i as f32)).collect()
}

#[test]
fn test_merge_fills_gap() {
    let temp_dir = TempDir::new().unwrap();
    let a = create_feed(temp_dir.path(), "1.dat", 1000, 10, &ramp(10, 0.0));
    let b = create_feed(temp_dir.path(), "2.dat", 1200, 10, &ramp(5, 100.0));
    let dest = temp_dir.path().join("3.dat");

    // Inputs in reverse order: the merger sorts them by start time.
    let merger = GapFillMerger::new(MergeConfig::default().with_buffer(BufferConfig::new(7)));
    let result = merger.merge(&b, &a, &dest).unwrap();

    assert_eq!(result.filler, 9);
    assert_eq!(result.meta.npoints, 24);
    assert_eq!(result.meta.start_time, 1000);
    assert_eq!(result.meta.interval, 10);
    assert_eq!(result.report.bytes, 24 * 4);
    assert_eq!(result.report.crc32, crc32fast::hash(&fs::read(&dest).unwrap()));

    let merged = FixedIntervalStore::open(&dest, BufferConfig::default()).unwrap();
    let values: Vec<Sample> = merged.points().unwrap().map(|p| p.unwrap().value).collect();
    assert_eq!(&values[..10], ramp(10, 0.0).as_slice());
    assert!(values[10..19].iter().all(|v| v.is_none()));
    assert_eq!(&values[19..], ramp(5, 100.0).as_slice());
}

#[test]
fn test_merge_copies_raw_bytes() {
    let temp_dir = TempDir::new().unwrap();
    let a = create_feed(temp_dir.path(), "1.dat", 1000, 10, &[Some(1.0), None, Some(-7.5)]);
    let b = create_feed(temp_dir.path(), "2.dat", 1040, 10, &[None, Some(2.0)]);
    let dest = temp_dir.path().join("3.dat");

    GapFillMerger::default().merge(&a, &b, &dest).unwrap();
    let mut expected = fs::read(&a).unwrap();
    expected.extend(fs::read(&b).unwrap());
    assert_eq!(fs::read(&dest).unwrap(), expected);
}

#[test]
fn test_merge_ignores_torn_tail() {
    let temp_dir = TempDir::new().unwrap();
    let a = create_feed(temp_dir.path(), "1.dat", 1000, 10, &ramp(3, 0.0));
    let b = create_feed(temp_dir.path(), "2.dat", 1050, 10, &ramp(2, 5.0));
    let mut raw = fs::read(&a).unwrap();
    raw.extend_from_slice(&[0xAB, 0xCD]);
    fs::write(&a, &raw).unwrap();

    let dest = temp_dir.path().join("3.dat");
    let result = GapFillMerger::default().merge(&a, &b, &dest).unwrap();
    assert_eq!(result.filler, 1);
    assert_eq!(result.meta.npoints, 6);
    assert_eq!(result.meta.file_size, 24);
}

#[test]
fn test_merge_duplicate() {
    let temp_dir = TempDir::new().unwrap();
    let a = create_feed(temp_dir.path(), "1.dat", 1000, 10, &ramp(10, 0.0));
    let b = create_feed(temp_dir.path(), "2.dat", 1000, 10, &ramp(5, 0.0));
    let dest = temp_dir.path().join("3.dat");

    let result = GapFillMerger::default().merge(&a, &b, &dest);
    assert!(matches!(result, Err(FeedError::Duplicate { start_time: 1000 })));
    assert!(!dest.exists());
}

#[test]
fn test_merge_overlap() {
    let temp_dir = TempDir::new().unwrap();
    let a = create_feed(temp_dir.path(), "1.dat", 1000, 10, &ramp(10, 0.0));
    let dest = temp_dir.path().join("9.dat");

    // Ends exactly where the other starts.
    let b = create_feed(temp_dir.path(), "2.dat", 1100, 10, &ramp(5, 0.0));
    assert!(matches!(
        GapFillMerger::default().merge(&a, &b, &dest),
        Err(FeedError::Overlap {
            old_end: 1100,
            new_start: 1100
        })
    ));

    let c = create_feed(temp_dir.path(), "3.dat", 1050, 10, &ramp(5, 0.0));
    assert!(matches!(
        GapFillMerger::default().merge(&c, &a, &dest),
        Err(FeedError::Overlap { .. })
    ));
    assert!(!dest.exists());
    assert!(!temp_dir.path().join("9.dat.tmp").exists());
}

#[test]
fn test_merge_gap_too_large() {
    let temp_dir = TempDir::new().unwrap();
    let a = create_feed(temp_dir.path(), "1.dat", 1000, 10, &ramp(10, 0.0));
    let b = create_feed(temp_dir.path(), "2.dat", 1100 + 864_010, 10, &ramp(5, 0.0));
    let dest = temp_dir.path().join("3.dat");

    assert!(matches!(
        GapFillMerger::default().merge(&a, &b, &dest),
        Err(FeedError::GapTooLarge {
            gap: 864_010,
            max_gap: 864_000
        })
    ));
    assert!(!dest.exists());

    // A larger ceiling lets the same merge through.
    let merger = GapFillMerger::new(MergeConfig::default().with_max_gap(1_000_000));
    let result = merger.merge(&a, &b, &dest).unwrap();
    assert_eq!(result.filler, 86_400);
    assert_eq!(result.meta.npoints, 10 + 86_400 + 5);
}

#[test]
fn test_merge_meta_failure_leaves_no_destination() {
    let temp_dir = TempDir::new().unwrap();
    let a = create_feed(temp_dir.path(), "1.dat", 1000, 10, &ramp(3, 0.0));
    let b = create_feed(temp_dir.path(), "2.dat", 1050, 10, &ramp(2, 5.0));
    let dest = temp_dir.path().join("3.dat");

    // A directory where the meta header belongs makes the final rename fail.
    let blocker = temp_dir.path().join("3.meta");
    fs::create_dir(&blocker).unwrap();
    fs::write(blocker.join("keep"), b"x").unwrap();

    assert!(GapFillMerger::default().merge(&a, &b, &dest).is_err());
    assert!(!dest.exists());
    assert!(!temp_dir.path().join("3.dat.tmp").exists());
    assert!(!temp_dir.path().join("3.meta.tmp").exists());
    assert!(blocker.is_dir());
}

#[test]
fn test_merge_writes_meta_beside_destination() {
    let temp_dir = TempDir::new().unwrap();
    let a = create_feed(temp_dir.path(), "1.dat", 1000, 10, &ramp(3, 0.0));
    let b = create_feed(temp_dir.path(), "2.dat", 1050, 10, &ramp(2, 5.0));
    let dest = temp_dir.path().join("3.dat");

    GapFillMerger::default().merge(&a, &b, &dest).unwrap();
    let header = MetaHeader::load(&temp_dir.path().join("3.meta")).unwrap();
    assert_eq!(header, MetaHeader::new(10, 1000).unwrap());
    assert!(!temp_dir.path().join("3.meta.tmp").exists());
}
