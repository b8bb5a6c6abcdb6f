//! Integration tests for the fixed-interval and sparse stores and text interchange.

use feedstore::store::{FixedIntervalStore, MetaHeader, Point, SparseEventStore, SparseRecord};
use feedstore::text::{dump_fixed, dump_sparse, load_fixed, load_sparse, TextFormat};
use feedstore::{BufferConfig, FeedError, Meta, Sample};
use proptest::prelude::*;
use std::fs;
use std::io::Cursor;
use tempfile::TempDir;

/// Helper generating a sensor-like series with periodic dropouts.
fn generate_samples(count: usize) -> Vec<Sample> {
    (0..count)
        .map(|i| {
            if i % 13 == 5 {
                None
            } else {
                Some(20.0 + (i as f32 * 0.1).sin() * 5.0)
            }
        })
        .collect()
}

fn assert_same_samples(left: &[Sample], right: &[Sample]) {
    assert_eq!(left.len(), right.len());
    for (i, (l, r)) in left.iter().zip(right).enumerate() {
        match (l, r) {
            (None, None) => {}
            (Some(a), Some(b)) => assert_eq!(a.to_bits(), b.to_bits(), "sample {}", i),
            _ => panic!("sample {}: {:?} != {:?}", i, l, r),
        }
    }
}

#[test]
fn test_meta_save_load_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.meta");
    for (interval, start) in [(1, 0), (10, 1_400_000_000), (u32::MAX, u32::MAX)] {
        let header = MetaHeader::new(interval, start).unwrap();
        header.save(&path).unwrap();
        assert_eq!(MetaHeader::load(&path).unwrap(), header);
        assert_eq!(fs::read(&path).unwrap(), header.to_bytes());
    }
}

#[test]
fn test_fixed_export_import_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let source_path = temp_dir.path().join("10.dat");
    let header = MetaHeader::new(10, 1_500_000_000).unwrap();
    let samples = generate_samples(5_000);

    let mut source =
        FixedIntervalStore::create(&source_path, header, BufferConfig::new(256)).unwrap();
    let mut appender = source.appender().unwrap();
    for sample in &samples {
        appender.push(*sample).unwrap();
    }
    appender.finish().unwrap();

    // Store to store through the lazy sequence.
    let target_path = temp_dir.path().join("11.dat");
    let mut target = FixedIntervalStore::create(
        &target_path,
        MetaHeader::new(10, 0).unwrap(),
        BufferConfig::default(),
    )
    .unwrap();
    let imported = target.import(source.points().unwrap(), true).unwrap();
    assert_eq!(imported, 5_000);
    assert_eq!(target.start_time(), 1_500_000_000);

    let copied: Vec<Sample> = target.points().unwrap().map(|p| p.unwrap().value).collect();
    assert_same_samples(&samples, &copied);

    // Store to text and back.
    let mut text = Vec::new();
    assert_eq!(dump_fixed(&source, &mut text, TextFormat::default()).unwrap(), 5_000);
    let loaded = load_fixed(
        Cursor::new(text),
        &temp_dir.path().join("12.dat"),
        TextFormat::default(),
        Some(10),
        BufferConfig::default(),
    )
    .unwrap();
    let reloaded: Vec<Sample> = loaded.points().unwrap().map(|p| p.unwrap().value).collect();
    assert_same_samples(&samples, &reloaded);

    let meta = Meta::read(loaded.path()).unwrap();
    assert_eq!(meta.feed_id, Some(12));
    assert_eq!(meta.start_time, 1_500_000_000);
    assert_eq!(meta.end_time(), 1_500_000_000 + 10 * 5_000);
}

#[test]
fn test_verbose_dump_loads_back() {
    let temp_dir = TempDir::new().unwrap();
    let header = MetaHeader::new(60, 1_700_000_000).unwrap();
    let mut store =
        FixedIntervalStore::create(temp_dir.path().join("2.dat"), header, BufferConfig::default())
            .unwrap();
    for v in [Some(1.0), None, Some(3.5), Some(-0.25)] {
        store.append(v).unwrap();
    }

    let format = TextFormat::default().with_verbose(true);
    let mut text = Vec::new();
    dump_fixed(&store, &mut text, format).unwrap();

    let loaded = load_fixed(
        Cursor::new(text),
        &temp_dir.path().join("3.dat"),
        format,
        None,
        BufferConfig::default(),
    )
    .unwrap();
    assert_eq!(loaded.interval(), 60);
    let values: Vec<Sample> = loaded.points().unwrap().map(|p| p.unwrap().value).collect();
    assert_same_samples(&values, &[Some(1.0), None, Some(3.5), Some(-0.25)]);
}

#[test]
fn test_out_of_range_access() {
    let temp_dir = TempDir::new().unwrap();
    let header = MetaHeader::new(10, 1000).unwrap();
    let mut store =
        FixedIntervalStore::create(temp_dir.path().join("4.dat"), header, BufferConfig::default())
            .unwrap();
    store.append(Some(1.0)).unwrap();
    store.append(Some(2.0)).unwrap();

    for index in [2, 3, 1_000] {
        assert!(matches!(store.read_at(index), Err(FeedError::OutOfRange { .. })));
        assert!(matches!(
            store.write_at(index, Some(0.0)),
            Err(FeedError::OutOfRange { .. })
        ));
    }
    assert_eq!(store.file_size().unwrap(), 8);
}

#[test]
fn test_sparse_text_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("feed_5.MYD");
    let mut store = SparseEventStore::create(&path, BufferConfig::new(18)).unwrap();
    let events = [(100, 1.0), (107, 0.5), (900, 12.0), (1_000_000, -3.0)];
    for (t, v) in events {
        assert!(store.append(t, Some(v)).unwrap());
    }

    let mut text = Vec::new();
    dump_sparse(&store, &mut text, TextFormat::default().with_delimiter(' ')).unwrap();
    let copy = load_sparse(
        Cursor::new(text),
        &temp_dir.path().join("feed_6.MYD"),
        TextFormat::default().with_delimiter(' '),
        BufferConfig::default(),
    )
    .unwrap();

    let records: Vec<SparseRecord> = copy.records().unwrap().map(|r| r.unwrap()).collect();
    let expected: Vec<SparseRecord> = events
        .iter()
        .map(|&(t, v)| SparseRecord::new(t, v))
        .collect();
    assert_eq!(records, expected);
    assert_eq!(fs::read(&path).unwrap(), fs::read(copy.path()).unwrap());
}

#[test]
fn test_sparse_truncated_export_leaves_source() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("feed_7.MYD");
    let mut store = SparseEventStore::create(&path, BufferConfig::default()).unwrap();
    store.append(10, Some(1.0)).unwrap();
    store.append(20, Some(2.0)).unwrap();

    let mut raw = fs::read(&path).unwrap();
    raw.extend_from_slice(&[0xF9, 0, 0, 0]);
    fs::write(&path, &raw).unwrap();

    let mut text = Vec::new();
    let result = dump_sparse(&store, &mut text, TextFormat::default());
    assert!(matches!(
        result,
        Err(FeedError::TruncatedRecord {
            offset: 18,
            len: 4,
            ..
        })
    ));
    assert_eq!(fs::read(&path).unwrap(), raw);
    assert_eq!(store.meta().unwrap().npoints, 2);
}

proptest! {
    /// Any series of finite or missing samples survives export and import.
    #[test]
    fn test_roundtrip_proptest(
        values in prop::collection::vec(prop::option::of(-1.0e6f32..1.0e6f32), 0..200),
        interval in 1u32..3600,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let header = MetaHeader::new(interval, 1_000_000).unwrap();
        let mut source = FixedIntervalStore::create(
            temp_dir.path().join("1.dat"),
            header,
            BufferConfig::new(64),
        )
        .unwrap();
        let mut appender = source.appender().unwrap();
        for v in &values {
            appender.push(*v).unwrap();
        }
        appender.finish().unwrap();

        let mut target = FixedIntervalStore::create(
            temp_dir.path().join("2.dat"),
            MetaHeader::new(interval, 0).unwrap(),
            BufferConfig::new(64),
        )
        .unwrap();
        target.import(source.points().unwrap(), true).unwrap();

        let copied: Vec<Point> = target.points().unwrap().map(|p| p.unwrap()).collect();
        prop_assert_eq!(copied.len(), values.len());
        for (point, original) in copied.iter().zip(&values) {
            match (point.value, original) {
                (None, None) => {}
                (Some(a), Some(b)) => prop_assert_eq!(a.to_bits(), b.to_bits()),
                _ => prop_assert!(false, "missing sample mismatch"),
            }
        }
    }
}
