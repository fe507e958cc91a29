use criterion::{criterion_group, BatchSize, Criterion};
use gpucmd_pool::DEFAULT_CAPACITY;

/// Number of buffers acquired from an empty pool per iteration.
const ACQUIRES: u32 = 64;

fn bench_grow(c: &mut Criterion) {
    for step in [1, 8, 32] {
        c.bench_function(&format!("{}/step={}", module_path!(), step), |b| {
            b.iter_batched(
                || super::pool(0, step, ACQUIRES, DEFAULT_CAPACITY),
                |pool| {
                    for _ in 0..ACQUIRES {
                        pool.acquire(DEFAULT_CAPACITY).unwrap();
                    }
                    pool.teardown();
                },
                BatchSize::SmallInput,
            );
        });
    }
}

criterion_group!(benches, bench_grow);
