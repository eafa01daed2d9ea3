use std::sync::Arc;

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use criterion::{criterion_group, criterion_main};

use datware::codec::WalkState;
use datware::{
    decode_record, encode_file, find_next_record_boundary, plan_splits, ByteSource, FormatHeader,
    PointFileInputFormat, PointRecord, ReaderConfig, TagInfo,
};

const RECORDS: usize = 100_000;

fn v1_file() -> (FormatHeader, Vec<u8>) {
    let header = FormatHeader::fixed(16).expect("header");
    let records: Vec<_> = (0..RECORDS)
        .map(|i| PointRecord::new(1_700_000_000_000 + i as i64 * 20, (i % 64) as u32, 0, i as f64))
        .collect();
    let bytes = encode_file(&header, &records).expect("encode");
    (header, bytes)
}

fn v2_file() -> (FormatHeader, Vec<u8>) {
    let header = FormatHeader::variable(
        (0..64)
            .map(|i| TagInfo::new(i, format!("PMU{i}:FREQ"), 0.001, 60.0))
            .collect(),
    )
    .expect("header");
    let records: Vec<_> = (0..RECORDS)
        .map(|i| {
            let deviation = if i % 5 == 0 { 50.0 } else { (i % 30) as f64 * 0.001 };
            PointRecord::new(1_700_000_000_000 + i as i64 * 20, (i % 64) as u32, 192, 60.0 + deviation)
        })
        .collect();
    let bytes = encode_file(&header, &records).expect("encode");
    (header, bytes)
}

fn bench_decode_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_record");
    for (name, (header, bytes)) in [("v1", v1_file()), ("v2", v2_file())] {
        let start = header.header_len as usize;
        group.bench_function(name, |b| {
            b.iter(|| decode_record(black_box(&header), black_box(&bytes[start..])).expect("decode"))
        });
    }
    group.finish();
}

fn bench_read_splits(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_splits");
    for (name, (_, bytes)) in [("v1", v1_file()), ("v2", v2_file())] {
        let len = bytes.len() as u64;
        let bytes: Arc<dyn ByteSource> = Arc::new(bytes);
        group.throughput(Throughput::Bytes(len));
        for &split_size in &[64 * 1024_u64, 1024 * 1024] {
            group.bench_with_input(
                BenchmarkId::new(name, split_size),
                &split_size,
                |b, &split_size| {
                    b.iter(|| {
                        let format =
                            PointFileInputFormat::new(ReaderConfig::default()).expect("format");
                        let mut total = 0usize;
                        for split in plan_splits("bench.d", len, split_size) {
                            let reader = format
                                .open_reader_with_source(&split, Arc::clone(&bytes))
                                .expect("open");
                            total += reader.count();
                        }
                        assert_eq!(total, RECORDS);
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_boundary_walk(c: &mut Criterion) {
    let (header, bytes) = v2_file();
    let target = bytes.len() as u64 / 2;
    let from = WalkState::at_boundary(header.header_len);
    let window = &bytes[header.header_len as usize..];
    c.bench_function("v2_walk_from_header", |b| {
        b.iter(|| {
            find_next_record_boundary(&header, black_box(window), from, black_box(target), true)
                .expect("walk")
        })
    });
}

criterion_group!(benches, bench_decode_record, bench_read_splits, bench_boundary_walk);
criterion_main!(benches);
