use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::MemTable;
use std::sync::Arc;
use types::{
    bytewise_comparator, GetContext, InternalIterator, InternalKeyComparator, LookupKey, ValueType,
    MAX_SEQUENCE_NUMBER,
};

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn new_memtable() -> Arc<MemTable> {
    Arc::new(MemTable::new(1, InternalKeyComparator::new(bytewise_comparator()), 0))
}

fn key(i: usize) -> Vec<u8> {
    format!("key{i:06}").into_bytes()
}

fn filled() -> Arc<MemTable> {
    let mem = new_memtable();
    let value = vec![b'x'; VALUE_SIZE];
    for i in 0..N_KEYS {
        mem.add(i as u64 + 1, ValueType::Value, &key(i), &value).unwrap();
    }
    mem
}

fn memtable_insert_benchmark(c: &mut Criterion) {
    c.bench_function("memtable_add_10k", |b| {
        b.iter_batched(
            new_memtable,
            |mem| {
                let value = vec![b'x'; VALUE_SIZE];
                for i in 0..N_KEYS {
                    mem.add(i as u64 + 1, ValueType::Value, &key(i), &value).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn memtable_overwrite_benchmark(c: &mut Criterion) {
    c.bench_function("memtable_overwrite_100_keys_10k", |b| {
        b.iter_batched(
            new_memtable,
            |mem| {
                for i in 0..N_KEYS {
                    mem.add(i as u64 + 1, ValueType::Value, &key(i % 100), b"v").unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn memtable_get_benchmark(c: &mut Criterion) {
    let mem = filled();
    let ucmp = bytewise_comparator();
    c.bench_function("memtable_get_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let k = key(i);
                let lk = LookupKey::new(&k, MAX_SEQUENCE_NUMBER);
                let mut ctx = GetContext::new(ucmp.as_ref(), None, &k, MAX_SEQUENCE_NUMBER);
                mem.get(&lk, &mut ctx).unwrap();
                assert!(ctx.finish().unwrap().is_some());
            }
        });
    });
}

fn memtable_iterate_benchmark(c: &mut Criterion) {
    let mem = filled();
    c.bench_function("memtable_iterate_10k", |b| {
        b.iter(|| {
            let mut it = mem.iter();
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
    memtable_insert_benchmark,
    memtable_overwrite_benchmark,
    memtable_get_benchmark,
    memtable_iterate_benchmark
);
criterion_main!(benches);
