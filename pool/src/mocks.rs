//! A mock implementation of [MemoryBackend] for testing.
//!
//! [Backend] hands out integer handles, remembers which are live, and can be told to fail
//! specific allocations or every resize. It panics on a double free so tests catch any path that
//! frees the same storage twice.

use crate::backend::{Error, MemoryBackend};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
};

/// Device context accepted by [Backend].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Context;

/// Handle returned by [Backend].
pub type Handle = u64;

/// A [MemoryBackend] that tracks live handles and injects failures on request.
#[derive(Debug, Default)]
pub struct Backend {
    /// Live handles and their capacity.
    live: Mutex<HashMap<Handle, u64>>,

    /// Allocation ordinals (0-based, counted across all calls) that should fail.
    fail_on: Mutex<HashSet<u64>>,

    /// Fail every allocation.
    fail_all: AtomicBool,

    /// Fail every resize.
    fail_resizes: AtomicBool,

    attempts: AtomicU64,
    resizes: AtomicU64,
    frees: AtomicU64,
    next: AtomicU64,
}

impl Backend {
    /// Makes the allocation with the given ordinal fail.
    pub fn fail_allocation(&self, ordinal: u64) {
        self.fail_on.lock().unwrap().insert(ordinal);
    }

    /// Makes every allocation fail (or succeed again).
    pub fn fail_allocations(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::Relaxed);
    }

    /// Makes every resize fail (or succeed again).
    pub fn fail_resizes(&self, fail: bool) {
        self.fail_resizes.store(fail, Ordering::Relaxed);
    }

    /// Number of handles allocated and not yet freed.
    pub fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Number of allocation attempts, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Number of successful resizes.
    pub fn resizes(&self) -> u64 {
        self.resizes.load(Ordering::Relaxed)
    }

    /// Number of handles freed.
    pub fn frees(&self) -> u64 {
        self.frees.load(Ordering::Relaxed)
    }

    /// Capacity of a live handle.
    pub fn capacity_of(&self, handle: Handle) -> Option<u64> {
        self.live.lock().unwrap().get(&handle).copied()
    }
}

impl MemoryBackend for Backend {
    type Context = Context;
    type Handle = Handle;

    fn allocate(&self, _: &Context, capacity: u64) -> Result<Handle, Error> {
        let ordinal = self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.fail_all.load(Ordering::Relaxed) || self.fail_on.lock().unwrap().remove(&ordinal) {
            return Err(Error::OutOfMemory {
                requested: capacity,
                available: 0,
            });
        }
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.live.lock().unwrap().insert(handle, capacity);
        Ok(handle)
    }

    fn resize(&self, handle: &Handle, capacity: u64) -> Result<(), Error> {
        let mut live = self.live.lock().unwrap();
        let current = live.get_mut(handle).ok_or(Error::UnknownHandle)?;
        if self.fail_resizes.load(Ordering::Relaxed) {
            return Err(Error::OutOfMemory {
                requested: capacity,
                available: 0,
            });
        }
        *current = capacity;
        self.resizes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn free(&self, handle: Handle) {
        let removed = self.live.lock().unwrap().remove(&handle);
        assert!(removed.is_some(), "double free of handle {handle}");
        self.frees.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_failures() {
        let backend = Backend::default();
        backend.fail_allocation(1);

        let first = backend.allocate(&Context, 64).unwrap();
        assert!(backend.allocate(&Context, 64).is_err());
        let third = backend.allocate(&Context, 64).unwrap();
        assert_eq!(backend.attempts(), 3);
        assert_eq!(backend.live(), 2);

        backend.fail_allocations(true);
        assert!(backend.allocate(&Context, 64).is_err());
        backend.fail_allocations(false);

        backend.free(first);
        backend.free(third);
        assert_eq!(backend.live(), 0);
        assert_eq!(backend.frees(), 2);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let backend = Backend::default();
        let handle = backend.allocate(&Context, 64).unwrap();
        backend.free(handle);
        backend.free(handle);
    }

    #[test]
    fn test_resize_unknown_handle() {
        let backend = Backend::default();
        assert_eq!(backend.resize(&42, 128), Err(Error::UnknownHandle));
    }
}
