use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use sstable::{ReadParams, TableBuilder, TableBuilderOptions, TableReader, TableReaderOptions};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use types::{
    bytewise_comparator, make_internal_key, GetContext, InternalIterator, InternalKeyComparator,
    LookupKey, ValueType, MAX_SEQUENCE_NUMBER,
};

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn icmp() -> InternalKeyComparator {
    InternalKeyComparator::new(bytewise_comparator())
}

fn key(i: usize) -> Vec<u8> {
    format!("key{i:06}").into_bytes()
}

fn build_table(path: &Path) {
    let mut opts = TableBuilderOptions::new(icmp());
    opts.sync = false;
    let mut builder = TableBuilder::create(path, opts).unwrap();
    let value = vec![b'x'; VALUE_SIZE];
    for i in 0..N_KEYS {
        builder
            .add(&make_internal_key(&key(i), i as u64 + 1, ValueType::Value), &value)
            .unwrap();
    }
    builder.finish().unwrap();
}

fn open(path: &Path) -> Arc<TableReader> {
    Arc::new(TableReader::open(path, icmp(), TableReaderOptions::default()).unwrap())
}

fn lookup(reader: &TableReader, user_key: &[u8]) -> Option<Vec<u8>> {
    let ucmp = bytewise_comparator();
    let lk = LookupKey::new(user_key, MAX_SEQUENCE_NUMBER);
    let mut ctx = GetContext::new(ucmp.as_ref(), None, user_key, MAX_SEQUENCE_NUMBER);
    reader.get(&ReadParams::default(), &lk, &mut ctx).unwrap();
    ctx.finish().unwrap()
}

fn sstable_write_benchmark(c: &mut Criterion) {
    c.bench_function("sstable_build_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");
                (dir, path)
            },
            |(_dir, path)| build_table(&path),
            BatchSize::SmallInput,
        );
    });
}

fn sstable_get_hit_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.sst");
    build_table(&path);
    let reader = open(&path);

    c.bench_function("sstable_get_hit_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                assert!(lookup(&reader, &key(i)).is_some());
            }
        });
    });
}

fn sstable_get_miss_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.sst");
    build_table(&path);
    let reader = open(&path);

    c.bench_function("sstable_get_miss_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let k = format!("missing{i}").into_bytes();
                assert!(lookup(&reader, &k).is_none());
            }
        });
    });
}

fn sstable_scan_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.sst");
    build_table(&path);
    let reader = open(&path);

    c.bench_function("sstable_full_scan_10k", |b| {
        b.iter(|| {
            let mut it = reader.new_iterator(ReadParams::default());
            it.seek_to_first();
            let mut n = 0;
            while it.valid() {
                n += 1;
                it.next();
            }
            assert_eq!(n, N_KEYS);
        });
    });
}

criterion_group!(
    benches,
    sstable_write_benchmark,
    sstable_get_hit_benchmark,
    sstable_get_miss_benchmark,
    sstable_scan_benchmark
);
criterion_main!(benches);
