use crate::{
    backend::MemoryBackend,
    buffer::{Buffer, BufferHandle, BufferId},
    config::Config,
    free_list::FreeList,
    metrics::Metrics,
    Error,
};
use prometheus_client::registry::Registry;
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, warn};

/// A consistent snapshot of a [BufferPool]'s collections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Buffers ready for reuse.
    pub available: usize,
    /// Buffers held by callers.
    pub in_use: usize,
    /// Buffers tracked by the pool (always `available + in_use`).
    pub total: u32,
    /// Whether the pool is initialized.
    pub initialized: bool,
}

/// State guarded by the `in_use` lock.
///
/// Every mutation takes this lock first, so the device context and the buffer count live here
/// alongside the in-use buffers.
struct InUse<B: MemoryBackend> {
    buffers: HashMap<BufferId, Buffer<B::Handle>>,
    /// Present while the pool is initialized.
    context: Option<B::Context>,
    total: u32,
}

/// A bounded pool of reusable command buffers.
///
/// Buffers are pre-warmed on [BufferPool::initialize], handed out by [BufferPool::acquire], and
/// returned with [BufferPool::release]. When nothing free is large enough the pool grows, up to
/// [Config::max_count] buffers. All backing storage is freed on [BufferPool::teardown] (or when
/// the pool is dropped).
///
/// The pool is meant to be owned by whatever drives submission and shared by reference (or
/// [std::sync::Arc]) with the threads that record commands.
pub struct BufferPool<B: MemoryBackend> {
    backend: B,
    config: Config,

    in_use: Mutex<InUse<B>>,
    available: Mutex<FreeList<B::Handle>>,

    metrics: Metrics,
}

impl<B: MemoryBackend> std::fmt::Debug for BufferPool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<B: MemoryBackend> BufferPool<B> {
    /// Creates an uninitialized pool that allocates from `backend`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(backend: B, config: Config, registry: &mut Registry) -> Self {
        config.validate();
        let metrics = Metrics::init(registry);
        Self {
            backend,
            config,
            in_use: Mutex::new(InUse {
                buffers: HashMap::new(),
                context: None,
                total: 0,
            }),
            available: Mutex::new(FreeList::new()),
            metrics,
        }
    }

    /// Locks `in_use`, then `available`.
    ///
    /// Both collections are only ever locked through this method, which fixes the lock order.
    fn lock(&self) -> (MutexGuard<'_, InUse<B>>, MutexGuard<'_, FreeList<B::Handle>>) {
        let in_use = self.in_use.lock().unwrap();
        let available = self.available.lock().unwrap();
        (in_use, available)
    }

    /// Pre-warms the pool with [Config::initial_count] buffers of `default_capacity` bytes.
    ///
    /// Calling this on an initialized pool does nothing. If any pre-warm allocation fails, every
    /// buffer allocated by this call is freed and the pool stays uninitialized, so the call can be
    /// retried.
    ///
    /// # Errors
    ///
    /// - [Error::NullArgument]: `context` is `None`
    /// - [Error::AllocationFailed]: the backend could not provide a pre-warm buffer
    pub fn initialize(
        &self,
        context: Option<B::Context>,
        default_capacity: u64,
    ) -> Result<(), Error> {
        let (mut in_use, mut available) = self.lock();
        if in_use.context.is_some() {
            debug!("pool already initialized");
            return Ok(());
        }
        let Some(context) = context else {
            warn!("cannot initialize pool without a device context");
            return Err(Error::NullArgument);
        };

        let mut prewarmed = Vec::with_capacity(self.config.initial_count as usize);
        for _ in 0..self.config.initial_count {
            match Buffer::allocate(&self.backend, &context, default_capacity) {
                Ok(buffer) => prewarmed.push(buffer),
                Err(err) => {
                    warn!(allocated = prewarmed.len(), ?err, "pre-warm failed");
                    self.metrics.allocation_failures.inc();
                    for buffer in prewarmed {
                        buffer.free(&self.backend);
                    }
                    return Err(err);
                }
            }
        }

        in_use.total = self.config.initial_count;
        in_use.context = Some(context);
        available.extend(prewarmed);
        self.metrics
            .record(available.len(), in_use.buffers.len(), in_use.total);
        debug!(
            count = in_use.total,
            capacity = default_capacity,
            "initialized pool"
        );
        Ok(())
    }

    /// Acquires a buffer with at least `requested` bytes of capacity.
    ///
    /// The largest free buffer is reused if it is big enough. Otherwise the pool grows:
    ///
    /// - If free buffers exist (but all are too small), one buffer of exactly `requested` bytes
    ///   is allocated for the caller and the free buffers are left for smaller requests.
    /// - If nothing is free, a batch of [Config::growth_step] buffers of `requested` bytes is
    ///   allocated. The first goes to the caller, the rest become available. Failed allocations
    ///   are skipped without aborting the batch.
    ///
    /// Returns `None` without blocking if the pool is uninitialized, already tracks
    /// [Config::max_count] buffers, or the allocation for the caller failed.
    pub fn acquire(&self, requested: u64) -> Option<BufferHandle<B::Handle>> {
        let (mut in_use, mut available) = self.lock();
        let InUse {
            buffers,
            context,
            total,
        } = &mut *in_use;
        let Some(context) = context.as_ref() else {
            warn!(requested, "acquire on uninitialized pool");
            return None;
        };

        // Reuse the largest free buffer if it fits
        if let Some(mut buffer) = available.take_fitting(requested) {
            let handle = buffer.lease();
            buffers.insert(buffer.id(), buffer);
            self.metrics.reused.inc();
            self.metrics.record(available.len(), buffers.len(), *total);
            return Some(handle);
        }

        let max = self.config.max_count.get();
        if *total >= max {
            self.metrics.exhausted.inc();
            debug!(requested, total = *total, "pool exhausted");
            return None;
        }

        let acquired = if available.is_empty() {
            // Grow by a batch, keeping the first buffer for the caller
            let batch = self.config.growth_step.get().min(max - *total);
            let mut acquired = None;
            let mut parked = Vec::with_capacity(batch as usize);
            for index in 0..batch {
                let mut buffer = match Buffer::allocate(&self.backend, context, requested) {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        self.metrics.allocation_failures.inc();
                        warn!(index, requested, ?err, "growth allocation failed");
                        continue;
                    }
                };
                *total += 1;
                self.metrics.grown.inc();
                if index == 0 {
                    acquired = Some(buffer.lease());
                    buffers.insert(buffer.id(), buffer);
                } else {
                    parked.push(buffer);
                }
            }
            debug!(
                requested,
                batch,
                parked = parked.len(),
                total = *total,
                "grew pool"
            );
            available.extend(parked);
            acquired
        } else {
            // Every free buffer is too small: allocate one just for this request
            match Buffer::allocate(&self.backend, context, requested) {
                Ok(mut buffer) => {
                    *total += 1;
                    self.metrics.grown.inc();
                    let handle = buffer.lease();
                    buffers.insert(buffer.id(), buffer);
                    Some(handle)
                }
                Err(err) => {
                    self.metrics.allocation_failures.inc();
                    warn!(requested, ?err, "allocation failed");
                    None
                }
            }
        };
        self.metrics.record(available.len(), buffers.len(), *total);
        acquired
    }

    /// Returns an acquired buffer to the pool for reuse.
    ///
    /// The buffer is placed ahead of the first free buffer with a strictly smaller capacity.
    ///
    /// # Errors
    ///
    /// - [Error::InvalidState]: the pool is not initialized
    /// - [Error::NotFound]: `handle` does not name an in-use buffer of this pool under its
    ///   current lease (for example, a copy of the handle was already released)
    pub fn release(&self, handle: BufferHandle<B::Handle>) -> Result<(), Error> {
        let (mut in_use, mut available) = self.lock();
        let id = handle.id();
        if in_use.context.is_none() {
            warn!(%id, "release on uninitialized pool");
            return Err(Error::InvalidState);
        }
        let buffer = match in_use.buffers.entry(id) {
            Entry::Occupied(entry) if entry.get().is_leased_by(&handle) => entry.remove(),
            _ => {
                warn!(%id, "release of unknown buffer");
                return Err(Error::NotFound(id));
            }
        };

        available.insert(buffer);
        self.metrics.released.inc();
        self.metrics
            .record(available.len(), in_use.buffers.len(), in_use.total);
        Ok(())
    }

    /// Grows the buffer named by `handle` to `capacity` bytes.
    ///
    /// Requests that do not exceed the current capacity succeed without effect. On success the
    /// handle's capacity is updated. A free buffer may be resized too, in which case it moves to
    /// its new position among the free buffers.
    ///
    /// The caller must not be recording into the buffer while it is resized.
    ///
    /// # Errors
    ///
    /// - [Error::InvalidState]: the pool is not initialized
    /// - [Error::NotFound]: `handle` does not name a buffer of this pool under its current lease
    /// - [Error::AllocationFailed]: the backend could not grow the buffer
    pub fn resize(
        &self,
        handle: &mut BufferHandle<B::Handle>,
        capacity: u64,
    ) -> Result<(), Error> {
        let (mut in_use, mut available) = self.lock();
        let id = handle.id();
        if in_use.context.is_none() {
            warn!(%id, "resize on uninitialized pool");
            return Err(Error::InvalidState);
        }

        let leased = in_use
            .buffers
            .get_mut(&id)
            .filter(|buffer| buffer.is_leased_by(handle));
        let result = if let Some(buffer) = leased {
            buffer
                .resize(&self.backend, capacity)
                .map(|()| buffer.capacity())
        } else if let Some(mut buffer) = available.remove(handle) {
            let result = buffer
                .resize(&self.backend, capacity)
                .map(|()| buffer.capacity());
            available.insert(buffer);
            result
        } else {
            warn!(%id, "resize of unknown buffer");
            return Err(Error::NotFound(id));
        };

        match result {
            Ok(capacity) => {
                handle.set_capacity(capacity);
                Ok(())
            }
            Err(err) => {
                self.metrics.allocation_failures.inc();
                Err(err)
            }
        }
    }

    /// Frees every buffer and returns the pool to its uninitialized state.
    ///
    /// Buffers still held by callers are freed as well (and reported as leaked). Handles to them
    /// must not be used afterwards. Does nothing if the pool is not initialized.
    pub fn teardown(&self) {
        let (mut in_use, mut available) = self.lock();
        free_all(&self.backend, &self.metrics, &mut in_use, &mut available);
    }

    /// Returns a snapshot of the pool's collections.
    pub fn stats(&self) -> Stats {
        let (in_use, available) = self.lock();
        Stats {
            available: available.len(),
            in_use: in_use.buffers.len(),
            total: in_use.total,
            initialized: in_use.context.is_some(),
        }
    }

    /// Returns the capacities of the free buffers, largest first.
    pub fn available_capacities(&self) -> Vec<u64> {
        let (_in_use, available) = self.lock();
        available.iter().map(Buffer::capacity).collect()
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the backend the pool allocates from.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: MemoryBackend> Drop for BufferPool<B> {
    fn drop(&mut self) {
        let in_use = self.in_use.get_mut().unwrap_or_else(PoisonError::into_inner);
        let available = self
            .available
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        free_all(&self.backend, &self.metrics, in_use, available);
    }
}

/// Frees every tracked buffer, reporting any still in use as leaked.
fn free_all<B: MemoryBackend>(
    backend: &B,
    metrics: &Metrics,
    in_use: &mut InUse<B>,
    available: &mut FreeList<B::Handle>,
) {
    if in_use.context.is_none() {
        return;
    }

    let freed = available.len();
    for buffer in available.drain() {
        buffer.free(backend);
    }

    let leaked = in_use.buffers.len();
    if leaked > 0 {
        warn!(leaked, "buffers still in use at teardown");
        metrics.leaked.inc_by(leaked as u64);
    }
    for (_, buffer) in in_use.buffers.drain() {
        buffer.free(backend);
    }

    in_use.total = 0;
    in_use.context = None;
    metrics.record(0, 0, 0);
    debug!(freed, leaked, "pool torn down");
}
