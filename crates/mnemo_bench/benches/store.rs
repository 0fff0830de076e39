//! Store transaction and query benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mnemo_bench::{bench_store, entity_ids, random_path};
use mnemo_core::{DatomStore, PartitionId, StoreConfig, Transaction, Value};
use tempfile::TempDir;

/// Benchmark one small transaction at a time.
fn bench_single_transact(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_transact");

    group.bench_function("memory", |b| {
        let (store, path, _) = bench_store();
        b.iter(|| {
            let mut tx = Transaction::new();
            let e = tx.temp_id(PartitionId::ENTITY);
            tx.add(e, path, random_path(16));
            black_box(store.transact(tx).wait().unwrap());
        });
    });

    group.sample_size(20);
    group.bench_function("file", |b| {
        let dir = TempDir::new().unwrap();
        let store = DatomStore::open(StoreConfig::default().path(dir.path())).unwrap();
        let path = store
            .register_attributes(vec![mnemo_core::AttributeDef::new(
                "bench/path",
                mnemo_core::ValueTag::Utf8,
            )])
            .unwrap()[0];
        b.iter(|| {
            let mut tx = Transaction::new();
            let e = tx.temp_id(PartitionId::ENTITY);
            tx.add(e, path, random_path(16));
            black_box(store.transact(tx).wait().unwrap());
        });
    });

    group.finish();
}

/// Benchmark transactions of increasing size.
fn bench_batch_transact(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_transact");

    for count in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let (store, path, size) = bench_store();
            b.iter(|| {
                let mut tx = Transaction::new();
                for n in 0..count {
                    let e = tx.temp_id(PartitionId::ENTITY);
                    tx.add(e, path, random_path(16)).add(e, size, n as u64);
                }
                black_box(store.transact(tx).wait().unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark replacing the same value repeatedly, which writes history.
fn bench_replace(c: &mut Criterion) {
    let (store, _, size) = bench_store();
    let e = PartitionId::ENTITY.make_id(1);
    let mut n = 0u64;

    c.bench_function("replace_cardinality_one", |b| {
        b.iter(|| {
            n += 1;
            let mut tx = Transaction::new();
            tx.add(e, size, n);
            black_box(store.transact(tx).wait().unwrap());
        });
    });
}

/// Benchmark point reads against a populated store.
fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let (store, path, size) = bench_store();
    let ids = entity_ids(10_000);

    for chunk in ids.chunks(1000) {
        let mut tx = Transaction::new();
        for e in chunk {
            tx.add(*e, path, format!("/file-{}", e.payload()))
                .add(*e, size, e.payload());
        }
        store.transact(tx).wait().unwrap();
    }
    let db = store.db();

    group.bench_function("get", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % ids.len();
            black_box(db.get(ids[i], size).unwrap());
        });
    });

    group.bench_function("find_by_value", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % ids.len();
            let value = Value::from(format!("/file-{}", ids[i].payload()));
            black_box(db.find_by_value(path, &value).unwrap());
        });
    });

    group.bench_function("entity", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % ids.len();
            black_box(db.entity(ids[i]).unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_transact,
    bench_batch_transact,
    bench_replace,
    bench_reads,
);
criterion_main!(benches);
