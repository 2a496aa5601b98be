use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use quotajail::{BucketKey, Limits, Policy, ShardedStore, Store};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const NOW: i64 = 1_700_000_000;

fn benchmark_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharded_store");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("single_key_admitted", |b| {
        let store = ShardedStore::new();
        let key = BucketKey::new("bench", "read");
        let mut now = NOW;

        b.iter(|| {
            // Advance the clock so the bucket never runs dry
            now += 1;
            black_box(
                store
                    .evaluate(&key, Limits::new(1_000, 1_000), Policy::default(), now)
                    .unwrap(),
            )
        });
    });

    group.bench_function("single_key_banned", |b| {
        let store = ShardedStore::new();
        let key = BucketKey::new("bench", "abuse");
        for _ in 0..10 {
            store
                .evaluate(&key, Limits::new(1, 0), Policy::new(2, i64::MAX / 2), NOW)
                .unwrap();
        }

        b.iter(|| {
            black_box(
                store
                    .evaluate(&key, Limits::new(1, 0), Policy::new(2, i64::MAX / 2), NOW)
                    .unwrap(),
            )
        });
    });

    group.bench_function("rotating_keys_10000", |b| {
        let store = ShardedStore::builder().capacity(10_000).build();
        let keys: Vec<_> = (0..10_000)
            .map(|i| BucketKey::new(format!("user:{i}"), "read"))
            .collect();
        let mut counter = 0usize;

        b.iter(|| {
            let key = &keys[counter % keys.len()];
            counter += 1;
            black_box(
                store
                    .evaluate(key, Limits::new(100, 10), Policy::default(), NOW)
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn benchmark_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharded_store_contention");
    group.measurement_time(Duration::from_secs(5));

    const THREADS: usize = 8;
    const OPS_PER_THREAD: usize = 1_000;
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    for shards in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::new("distinct_keys", shards), &shards, |b, &shards| {
            let store = Arc::new(ShardedStore::builder().shards(shards).build());

            b.iter(|| {
                let handles: Vec<_> = (0..THREADS)
                    .map(|t| {
                        let store = Arc::clone(&store);
                        thread::spawn(move || {
                            for i in 0..OPS_PER_THREAD {
                                let key = BucketKey::new(format!("t{t}:{}", i % 64), "write");
                                black_box(
                                    store
                                        .evaluate(&key, Limits::new(50, 5), Policy::default(), NOW)
                                        .unwrap(),
                                );
                            }
                        })
                    })
                    .collect();

                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_single_thread, benchmark_contention);
criterion_main!(benches);
