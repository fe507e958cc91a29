use criterion::{black_box, criterion_group, Criterion};
use gpucmd_pool::DEFAULT_CAPACITY;

fn bench_acquire_release(c: &mut Criterion) {
    for held in [0, 16, 256] {
        c.bench_function(&format!("{}/held={}", module_path!(), held), |b| {
            let pool = super::pool(held + 1, 1, held + 1, DEFAULT_CAPACITY);

            // Keep some buffers outstanding so reinsertion works against a realistic list
            let outstanding: Vec<_> = (0..held)
                .map(|_| pool.acquire(DEFAULT_CAPACITY).unwrap())
                .collect();
            b.iter(|| {
                let buffer = pool.acquire(black_box(1024)).unwrap();
                pool.release(buffer).unwrap();
            });
            for buffer in outstanding {
                pool.release(buffer).unwrap();
            }
        });
    }
}

criterion_group!(benches, bench_acquire_release);
