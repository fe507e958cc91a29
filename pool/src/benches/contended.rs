use criterion::{criterion_group, Criterion};
use gpucmd_pool::DEFAULT_CAPACITY;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// Acquire/release pairs performed by each thread per iteration.
const OPERATIONS: usize = 1_000;

fn bench_contended(c: &mut Criterion) {
    for threads in [2, 4, 8] {
        c.bench_function(&format!("{}/threads={}", module_path!(), threads), |b| {
            let pool = Arc::new(super::pool(threads, 1, threads, DEFAULT_CAPACITY));
            b.iter_custom(|iters| {
                let mut duration = Duration::ZERO;
                for _ in 0..iters {
                    let start = Instant::now();
                    let workers: Vec<_> = (0..threads)
                        .map(|_| {
                            let pool = pool.clone();
                            thread::spawn(move || {
                                for _ in 0..OPERATIONS {
                                    let buffer = pool.acquire(1024).unwrap();
                                    pool.release(buffer).unwrap();
                                }
                            })
                        })
                        .collect();
                    for worker in workers {
                        worker.join().unwrap();
                    }
                    duration += start.elapsed();
                }
                duration
            });
        });
    }
}

criterion_group!(benches, bench_contended);
