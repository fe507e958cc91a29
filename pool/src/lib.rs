//! Acquire, grow, and recycle GPU command buffers from a bounded pool.
//!
//! Hardware commands are recorded into fixed-capacity, GPU-visible buffers before they are
//! submitted to an execution engine. [BufferPool] hands those buffers out, tracks which ones are
//! outstanding, grows in batches when it runs dry, and frees everything on [BufferPool::teardown].
//!
//! # Ownership
//!
//! Every buffer allocated by a pool lives in exactly one of two collections:
//!
//! - `available`: free buffers, ordered by descending capacity.
//! - `in_use`: buffers acquired by a caller and not yet released.
//!
//! Callers never hold a buffer directly. [BufferPool::acquire] returns a [BufferHandle] naming
//! the buffer and exposing its backing storage; the same handle is passed back to
//! [BufferPool::release] or [BufferPool::resize]. A handle is only valid for the acquisition that
//! produced it: after release, every copy of it is rejected with [Error::NotFound].
//!
//! # Reuse Policy
//!
//! Only the largest free buffer is inspected on acquire. Because `available` is kept sorted, if
//! the largest free buffer cannot satisfy a request then no free buffer can, and the pool
//! allocates a fresh one instead (leaving the smaller free buffers for smaller requests).
//!
//! # Locking
//!
//! `in_use` and `available` are guarded by two independent locks that are always taken in the
//! same order: `in_use` first, then `available`. Acquire never blocks waiting for a release: when
//! the pool is at its configured maximum and nothing is free, it returns `None` immediately.
//!
//! # Backends
//!
//! Backing storage is provided by a [MemoryBackend]. [SystemBackend] serves buffers from host
//! memory and [mocks::Backend] injects allocation failures for testing.
//!
//! # Example
//!
//! ```rust
//! use gpucmd_pool::{BufferPool, Config, SystemBackend, SystemDevice};
//! use prometheus_client::registry::Registry;
//!
//! // Create a pool backed by host memory
//! let mut registry = Registry::default();
//! let pool = BufferPool::new(SystemBackend::default(), Config::minimal(), &mut registry);
//! pool.initialize(Some(SystemDevice::new(1 << 20)), 4096).unwrap();
//!
//! // Record into a buffer
//! let buffer = pool.acquire(1024).expect("pool exhausted");
//! pool.backend().write_at(buffer.backing(), 0, &[0x11; 16]).unwrap();
//!
//! // Return it for reuse
//! pool.release(buffer).unwrap();
//!
//! // Free all backing storage
//! pool.teardown();
//! ```

pub mod backend;
mod buffer;
mod config;
mod free_list;
mod metrics;
pub mod mocks;
mod pool;

pub use backend::{MemoryBackend, SystemBackend, SystemDevice, SystemHandle};
pub use buffer::{BufferHandle, BufferId};
pub use config::{Config, DEFAULT_CAPACITY};
pub use pool::{BufferPool, Stats};
use thiserror::Error;

/// Create a [std::num::NonZeroU32] from a value, panicking if it is zero.
#[macro_export]
macro_rules! NZU32 {
    ($val:expr) => {
        ::std::num::NonZeroU32::new($val).expect("value must be non-zero")
    };
}

/// Errors that can occur when interacting with a [BufferPool].
#[derive(Error, Debug)]
pub enum Error {
    #[error("pool not initialized")]
    InvalidState,
    #[error("missing device context")]
    NullArgument,
    #[error("allocation of {requested} bytes failed: {source}")]
    AllocationFailed {
        requested: u64,
        #[source]
        source: backend::Error,
    },
    #[error("buffer not found: {0}")]
    NotFound(BufferId),
}
