//! Benchmark: quiesce-set operation throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quiesce_set::{pin, HashSet};
use std::sync::Arc;
use std::thread;

const SMALL_OPS: usize = 1_000;
const MEDIUM_OPS: usize = 10_000;
const LARGE_OPS: usize = 100_000;

const THREAD_COUNTS: &[usize] = &[1, 2, 4, 8];

/// Benchmark: single-threaded insert operations
fn bench_single_thread_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread_insert");

    for &size in &[SMALL_OPS, MEDIUM_OPS, LARGE_OPS] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("quiesce-set", size), &size, |b, &size| {
            b.iter(|| {
                let set = HashSet::with_capacity(size, 1);
                for i in 0..size {
                    set.insert(black_box(i));
                }
                set
            });
        });
    }

    group.finish();
}

/// Benchmark: single-threaded lookups over a populated set
fn bench_single_thread_contains(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread_contains");

    for &size in &[SMALL_OPS, MEDIUM_OPS, LARGE_OPS] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("quiesce-set", size), &size, |b, &size| {
            let set = HashSet::with_capacity(size, 1);
            for i in 0..size {
                set.insert(i);
            }
            b.iter(|| {
                let mut hits = 0;
                for i in 0..size {
                    if set.contains(&black_box(i)) {
                        hits += 1;
                    }
                }
                hits
            });
        });
    }

    group.finish();
}

/// Benchmark: concurrent mixed insert/contains/remove workload
fn bench_concurrent_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_mixed");

    for &threads in THREAD_COUNTS {
        let ops = MEDIUM_OPS;
        group.throughput(Throughput::Elements((threads * ops) as u64));

        group.bench_with_input(
            BenchmarkId::new("quiesce-set", threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let set = Arc::new(HashSet::with_capacity(threads * ops, 2));
                    let mut handles = Vec::with_capacity(threads);
                    for t in 0..threads {
                        let set = set.clone();
                        handles.push(thread::spawn(move || {
                            for i in 0..ops {
                                let key = t * ops + i;
                                match i % 4 {
                                    0 => {
                                        set.remove(&key);
                                    }
                                    1 => {
                                        set.contains(&key);
                                    }
                                    _ => {
                                        set.insert(key);
                                    }
                                }
                            }
                        }));
                    }
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_thread_insert,
    bench_single_thread_contains,
    bench_concurrent_mixed
);
criterion_main!(benches);
