//! Backing storage for command buffers.
//!
//! A [MemoryBackend] performs the device-level work behind a [crate::Buffer]: allocating
//! GPU-visible storage, growing it in place, and freeing it. The pool never touches the storage
//! itself, it only moves opaque [MemoryBackend::Handle]s between its collections.

mod system;

use std::sync::Arc;
pub use system::{SystemBackend, SystemDevice, SystemHandle};
use thiserror::Error;

/// Errors that can occur when interacting with a [MemoryBackend].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },
    #[error("invalid capacity: {0}")]
    InvalidCapacity(u64),
    #[error("unknown handle")]
    UnknownHandle,
    #[error("access out of bounds: offset {offset} len {len} capacity {capacity}")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },
}

/// Interface that any provider of command buffer storage must implement.
///
/// Implementations are shared by every thread using the pool and must synchronize internally.
pub trait MemoryBackend: Send + Sync {
    /// Device (or OS) context required to allocate storage.
    type Context: Send + Sync;

    /// Opaque reference to allocated storage.
    ///
    /// The handle must remain valid (and unchanged) across [MemoryBackend::resize].
    type Handle: Clone + std::fmt::Debug + Send + Sync;

    /// Allocate storage of at least `capacity` bytes.
    fn allocate(&self, context: &Self::Context, capacity: u64) -> Result<Self::Handle, Error>;

    /// Grow the storage behind `handle` to `capacity` bytes, preserving its contents.
    ///
    /// The pool only calls this with a `capacity` larger than the current one.
    fn resize(&self, handle: &Self::Handle, capacity: u64) -> Result<(), Error>;

    /// Release the storage behind `handle`.
    fn free(&self, handle: Self::Handle);
}

impl<B: MemoryBackend> MemoryBackend for Arc<B> {
    type Context = B::Context;
    type Handle = B::Handle;

    fn allocate(&self, context: &Self::Context, capacity: u64) -> Result<Self::Handle, Error> {
        (**self).allocate(context, capacity)
    }

    fn resize(&self, handle: &Self::Handle, capacity: u64) -> Result<(), Error> {
        (**self).resize(handle, capacity)
    }

    fn free(&self, handle: Self::Handle) {
        (**self).free(handle)
    }
}
