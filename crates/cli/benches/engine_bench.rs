use config::Options;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{ReadOptions, WriteOptions, DB};
use tempfile::tempdir;
use wal::WriteBatch;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn key(i: usize) -> Vec<u8> {
    format!("key{i:06}").into_bytes()
}

fn options() -> Options {
    Options::new().create_if_missing(true)
}

fn loaded_db(dir: &std::path::Path, flush: bool) -> DB {
    let db = DB::open(&options(), dir).unwrap();
    let value = vec![b'x'; VALUE_SIZE];
    for i in 0..N_KEYS {
        db.put(key(i), &value).unwrap();
    }
    if flush {
        db.flush().unwrap();
    }
    db
}

fn put_benchmark(c: &mut Criterion) {
    c.bench_function("db_put_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = DB::open(&options(), dir.path()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                let value = vec![b'x'; VALUE_SIZE];
                for i in 0..N_KEYS {
                    db.put(key(i), &value).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });
}

fn batch_write_benchmark(c: &mut Criterion) {
    c.bench_function("db_write_batch_100x100", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = DB::open(&options(), dir.path()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                let value = vec![b'x'; VALUE_SIZE];
                for chunk in 0..100 {
                    let mut batch = WriteBatch::new();
                    for i in 0..100 {
                        batch.put(key(chunk * 100 + i), &value);
                    }
                    db.write(&WriteOptions::default(), batch).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });
}

fn get_memtable_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let db = loaded_db(dir.path(), false);
    c.bench_function("db_get_memtable_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                assert!(db.get(key(i)).unwrap().is_some());
            }
        });
    });
}

fn get_table_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let db = loaded_db(dir.path(), true);
    c.bench_function("db_get_table_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                assert!(db.get(key(i)).unwrap().is_some());
            }
        });
    });
}

fn scan_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let db = loaded_db(dir.path(), true);
    c.bench_function("db_full_scan_10k", |b| {
        b.iter(|| {
            let n = db
                .iterator(&ReadOptions::default())
                .unwrap()
                .entries()
                .count();
            assert_eq!(n, N_KEYS);
        });
    });
}

criterion_group!(
    benches,
    put_benchmark,
    batch_write_benchmark,
    get_memtable_benchmark,
    get_table_benchmark,
    scan_benchmark
);
criterion_main!(benches);
