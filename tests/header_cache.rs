use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use datware::{
    encode_file, plan_splits, ByteSource, FileId, FormatHeader, PointFileInputFormat,
    PointRecord, ReaderConfig, TagInfo,
};

/// Positional source that counts reads of the file's first byte.
struct CountingSource {
    bytes: Vec<u8>,
    header_reads: AtomicUsize,
}

impl ByteSource for CountingSource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> datware::Result<usize> {
        if offset == 0 {
            self.header_reads.fetch_add(1, Ordering::SeqCst);
        }
        self.bytes.read_at(offset, buf)
    }
}

/// Positional source that logs every read offset past the preamble.
struct LoggingSource {
    bytes: Vec<u8>,
    offsets: Mutex<Vec<u64>>,
}

impl LoggingSource {
    fn take_offsets(&self) -> Vec<u64> {
        std::mem::take(&mut *self.offsets.lock().expect("lock"))
    }
}

impl ByteSource for LoggingSource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> datware::Result<usize> {
        if offset > 0 {
            self.offsets.lock().expect("lock").push(offset);
        }
        self.bytes.read_at(offset, buf)
    }
}

fn v2_file(records: usize) -> Vec<u8> {
    let header = FormatHeader::variable(
        (0..16)
            .map(|i| TagInfo::new(i, format!("PLANT{i}:GEN:MW"), 0.01, 0.0))
            .collect(),
    )
    .expect("header");
    let records: Vec<_> = (0..records)
        .map(|i| PointRecord::new(1_700_000_000_000 + i as i64, (i % 16) as u32, 0, i as f64))
        .collect();
    encode_file(&header, &records).expect("encode")
}

#[test]
fn concurrent_opens_parse_header_once() {
    let source = Arc::new(CountingSource {
        bytes: v2_file(2_000),
        header_reads: AtomicUsize::new(0),
    });
    let len = source.len();
    let splits = plan_splits("plant.d", len, len / 8 + 1);
    let format = PointFileInputFormat::new(ReaderConfig::default()).expect("format");
    let opened = Barrier::new(splits.len());

    let counts: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = splits
            .iter()
            .map(|split| {
                let source: Arc<dyn ByteSource> = source.clone();
                let format = &format;
                let opened = &opened;
                scope.spawn(move || {
                    let reader = format
                        .open_reader_with_source(split, source)
                        .expect("open");
                    opened.wait();
                    reader.map(|record| record.expect("record")).count()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect()
    });

    assert_eq!(counts.iter().sum::<usize>(), 2_000);
    assert_eq!(source.header_reads.load(Ordering::SeqCst), 1);
    assert!(format.cache().is_empty());
}

#[test]
fn entry_lives_until_last_reader_closes() {
    let bytes = Arc::new(v2_file(100));
    let len = bytes.len() as u64;
    let format = PointFileInputFormat::new(ReaderConfig::default()).expect("format");
    let file = FileId::new("plant.d");
    let splits = plan_splits(file.clone(), len, len / 2 + 1);

    let mut first = format
        .open_reader_with_source(&splits[0], bytes.clone())
        .expect("open first");
    let mut second = format
        .open_reader_with_source(&splits[1], bytes.clone())
        .expect("open second");
    assert!(Arc::ptr_eq(
        first.header().expect("header"),
        second.header().expect("header")
    ));
    assert_eq!(format.cache().len(), 1);

    first.close();
    assert!(format.cache().contains(&file));
    second.close();
    assert!(!format.cache().contains(&file));
}

#[test]
fn sequential_splits_walk_from_earlier_anchors() {
    let source = Arc::new(LoggingSource {
        bytes: v2_file(2_000),
        offsets: Mutex::new(Vec::new()),
    });
    let len = source.len();
    let file = FileId::new("plant.d");
    let splits = plan_splits(file.clone(), len, len / 4 + 1);
    assert_eq!(splits.len(), 4);
    let format = PointFileInputFormat::new(ReaderConfig::default()).expect("format");

    let mut total = 0;
    for (k, split) in splits.iter().enumerate() {
        if k > 0 {
            let anchor = format
                .cache()
                .nearest_anchor(&file, split.start)
                .expect("anchor from earlier split");
            assert!(anchor >= splits[k - 1].start);
        }
        source.take_offsets();
        let mut reader = format
            .open_reader_with_source(split, source.clone())
            .expect("open");
        let walked_from = source.take_offsets().into_iter().min();
        if k > 0 {
            assert!(walked_from.expect("boundary read") >= splits[k - 1].start);
        }
        total += reader.by_ref().map(|record| record.expect("record")).count();
        reader.close();
        assert!(format.cache().is_empty());
    }
    assert_eq!(total, 2_000);

    format.cache().forget(&file);
    assert_eq!(format.cache().nearest_anchor(&file, len), None);
}
