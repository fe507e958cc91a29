use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Metrics for a [crate::BufferPool].
pub(crate) struct Metrics {
    /// Number of buffers ready for reuse.
    pub available: Gauge,
    /// Number of buffers held by callers.
    pub in_use: Gauge,
    /// Number of buffers tracked by the pool.
    pub buffers: Gauge,
    /// Acquisitions served by an existing free buffer.
    pub reused: Counter,
    /// Buffers allocated after initialization.
    pub grown: Counter,
    /// Acquisitions refused because the pool was at its maximum.
    pub exhausted: Counter,
    /// Allocations (or resizes) the backend could not satisfy.
    pub allocation_failures: Counter,
    /// Buffers returned by callers.
    pub released: Counter,
    /// Buffers still in use when the pool was torn down.
    pub leaked: Counter,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self {
            available: Gauge::default(),
            in_use: Gauge::default(),
            buffers: Gauge::default(),
            reused: Counter::default(),
            grown: Counter::default(),
            exhausted: Counter::default(),
            allocation_failures: Counter::default(),
            released: Counter::default(),
            leaked: Counter::default(),
        };

        registry.register(
            "cmdbuf_pool_available",
            "Number of command buffers ready for reuse",
            metrics.available.clone(),
        );
        registry.register(
            "cmdbuf_pool_in_use",
            "Number of command buffers held by callers",
            metrics.in_use.clone(),
        );
        registry.register(
            "cmdbuf_pool_buffers",
            "Number of command buffers tracked by the pool",
            metrics.buffers.clone(),
        );
        registry.register(
            "cmdbuf_pool_reused",
            "Total number of acquisitions served by a free buffer",
            metrics.reused.clone(),
        );
        registry.register(
            "cmdbuf_pool_grown",
            "Total number of command buffers allocated to grow the pool",
            metrics.grown.clone(),
        );
        registry.register(
            "cmdbuf_pool_exhausted",
            "Total number of acquisitions refused because the pool was full",
            metrics.exhausted.clone(),
        );
        registry.register(
            "cmdbuf_pool_allocation_failures",
            "Total number of backend allocations or resizes that failed",
            metrics.allocation_failures.clone(),
        );
        registry.register(
            "cmdbuf_pool_released",
            "Total number of command buffers returned by callers",
            metrics.released.clone(),
        );
        registry.register(
            "cmdbuf_pool_leaked",
            "Total number of command buffers still in use at teardown",
            metrics.leaked.clone(),
        );

        metrics
    }

    /// Publishes the current collection sizes.
    pub fn record(&self, available: usize, in_use: usize, buffers: u32) {
        self.available.set(available as i64);
        self.in_use.set(in_use as i64);
        self.buffers.set(buffers as i64);
    }
}
