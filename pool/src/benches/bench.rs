use criterion::criterion_main;
use gpucmd_pool::{BufferPool, Config, SystemBackend, SystemDevice, NZU32};
use prometheus_client::registry::Registry;

mod acquire_release;
mod contended;
mod grow;

criterion_main!(acquire_release::benches, grow::benches, contended::benches);

/// Device budget large enough that no benchmark runs out of memory.
const DEVICE_BUDGET: u64 = 1 << 30;

/// Create a pool backed by host memory and pre-warm it with `initial_count` buffers of
/// `capacity` bytes.
fn pool(
    initial_count: u32,
    growth_step: u32,
    max_count: u32,
    capacity: u64,
) -> BufferPool<SystemBackend> {
    let config = Config {
        initial_count,
        growth_step: NZU32!(growth_step),
        max_count: NZU32!(max_count),
    };
    let mut registry = Registry::default();
    let pool = BufferPool::new(SystemBackend::default(), config, &mut registry);
    pool.initialize(Some(SystemDevice::new(DEVICE_BUDGET)), capacity)
        .unwrap();
    pool
}
