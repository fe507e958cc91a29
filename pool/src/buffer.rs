use crate::{backend::MemoryBackend, Error};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::warn;

/// Source of [BufferId]s.
///
/// Shared by every pool in the process so a handle from one pool can never name a buffer
/// tracked by another.
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies a [Buffer] for its entire lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A resizable block of GPU-visible memory.
///
/// A [Buffer] only exists once its backing storage has been allocated: there is no partially
/// constructed state to clean up when an allocation fails. Capacity never shrinks.
///
/// Every acquisition leases the buffer anew. Only handles carrying the current lease may
/// release or resize it, so a stale copy of an old handle cannot touch the buffer once someone
/// else holds it.
pub(crate) struct Buffer<H> {
    id: BufferId,
    capacity: u64,
    backing: H,
    lease: u64,
}

impl<H: Clone> Buffer<H> {
    /// Allocates backing storage of `capacity` bytes from `backend`.
    pub(crate) fn allocate<B>(
        backend: &B,
        context: &B::Context,
        capacity: u64,
    ) -> Result<Self, Error>
    where
        B: MemoryBackend<Handle = H>,
    {
        let backing = backend
            .allocate(context, capacity)
            .map_err(|source| Error::AllocationFailed {
                requested: capacity,
                source,
            })?;
        Ok(Self::from_parts(BufferId::next(), capacity, backing))
    }

    pub(crate) const fn from_parts(id: BufferId, capacity: u64, backing: H) -> Self {
        Self {
            id,
            capacity,
            backing,
            lease: 0,
        }
    }

    /// Grows the backing storage to `capacity` bytes.
    ///
    /// Requests that do not exceed the current capacity succeed without touching the backend.
    /// The caller must hold the only reference to this buffer for the duration of the call.
    pub(crate) fn resize<B>(&mut self, backend: &B, capacity: u64) -> Result<(), Error>
    where
        B: MemoryBackend<Handle = H>,
    {
        if capacity <= self.capacity {
            return Ok(());
        }
        if let Err(source) = backend.resize(&self.backing, capacity) {
            warn!(
                id = %self.id,
                current = self.capacity,
                requested = capacity,
                ?source,
                "resize failed"
            );
            return Err(Error::AllocationFailed {
                requested: capacity,
                source,
            });
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Returns the backing storage to `backend`.
    pub(crate) fn free<B>(self, backend: &B)
    where
        B: MemoryBackend<Handle = H>,
    {
        backend.free(self.backing);
    }

    /// Starts a new lease on the buffer and returns the only handle that carries it.
    pub(crate) fn lease(&mut self) -> BufferHandle<H> {
        self.lease += 1;
        BufferHandle {
            id: self.id,
            lease: self.lease,
            capacity: self.capacity,
            backing: self.backing.clone(),
        }
    }
}

impl<H> Buffer<H> {
    pub const fn id(&self) -> BufferId {
        self.id
    }

    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    #[cfg(test)]
    pub const fn backing(&self) -> &H {
        &self.backing
    }

    /// Returns true if `handle` names this buffer under its current lease.
    pub fn is_leased_by(&self, handle: &BufferHandle<H>) -> bool {
        self.id == handle.id && self.lease == handle.lease
    }
}

impl<H: fmt::Debug> fmt::Debug for Buffer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("backing", &self.backing)
            .field("lease", &self.lease)
            .finish()
    }
}

/// A caller's reference to an acquired command buffer.
///
/// Obtained from [crate::BufferPool::acquire] and passed back to [crate::BufferPool::release]
/// (or [crate::BufferPool::resize]). The handle carries the backend handle so commands can be
/// recorded into the buffer while it is held.
///
/// Cloning a handle does not clone the buffer. Each handle is bound to the acquisition that
/// produced it: once the buffer is released, every copy of the handle is stale and fails with
/// [Error::NotFound], even after the same buffer is acquired again.
#[derive(Clone, Debug)]
pub struct BufferHandle<H> {
    id: BufferId,
    lease: u64,
    capacity: u64,
    backing: H,
}

impl<H> BufferHandle<H> {
    /// Returns the identifier of the buffer.
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Returns the capacity of the buffer in bytes, as of acquisition or the last resize made
    /// through this handle.
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the backend handle of the buffer's storage.
    pub const fn backing(&self) -> &H {
        &self.backing
    }

    pub(crate) fn set_capacity(&mut self, capacity: u64) {
        self.capacity = capacity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks;

    #[test]
    fn test_ids_are_unique() {
        let a = BufferId::next();
        let b = BufferId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(format!("{}", BufferId(7)), "#7");
    }

    #[test]
    fn test_allocate_and_free() {
        let backend = mocks::Backend::default();
        let mut buffer = Buffer::allocate(&backend, &mocks::Context, 4096).unwrap();
        assert_eq!(buffer.capacity(), 4096);
        assert_eq!(backend.live(), 1);

        let handle = buffer.lease();
        assert_eq!(handle.id(), buffer.id());
        assert_eq!(handle.capacity(), 4096);
        assert_eq!(handle.backing(), buffer.backing());

        buffer.free(&backend);
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn test_allocate_failure_constructs_nothing() {
        let backend = mocks::Backend::default();
        backend.fail_allocation(0);
        let result = Buffer::allocate(&backend, &mocks::Context, 4096);
        assert!(matches!(
            result,
            Err(Error::AllocationFailed {
                requested: 4096,
                ..
            })
        ));
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn test_new_lease_invalidates_old_handles() {
        let backend = mocks::Backend::default();
        let mut buffer = Buffer::allocate(&backend, &mocks::Context, 4096).unwrap();

        let first = buffer.lease();
        let copy = first.clone();
        assert!(buffer.is_leased_by(&first));
        assert!(buffer.is_leased_by(&copy));

        // Same buffer, same id, but only the newest handle is current
        let second = buffer.lease();
        assert_eq!(first.id(), second.id());
        assert!(!buffer.is_leased_by(&first));
        assert!(!buffer.is_leased_by(&copy));
        assert!(buffer.is_leased_by(&second));

        buffer.free(&backend);
    }

    #[test]
    fn test_resize_only_grows() {
        let backend = mocks::Backend::default();
        let mut buffer = Buffer::allocate(&backend, &mocks::Context, 1024).unwrap();

        // Shrinking is a no-op
        buffer.resize(&backend, 512).unwrap();
        assert_eq!(buffer.capacity(), 1024);
        assert_eq!(backend.resizes(), 0);

        // Growing goes through the backend
        buffer.resize(&backend, 8192).unwrap();
        assert_eq!(buffer.capacity(), 8192);
        assert_eq!(backend.capacity_of(*buffer.backing()), Some(8192));
        assert_eq!(backend.resizes(), 1);

        // Failed growth leaves capacity untouched
        backend.fail_resizes(true);
        assert!(buffer.resize(&backend, 16384).is_err());
        assert_eq!(buffer.capacity(), 8192);

        buffer.free(&backend);
    }
}
