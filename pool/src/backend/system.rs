//! Host-memory implementation of [MemoryBackend].

use super::{Error, MemoryBackend};
use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    collections::HashMap,
    num::NonZeroUsize,
    ptr::NonNull,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tracing::warn;

/// Returns the cache line size for the current architecture.
///
/// Uses 128 bytes for x86_64 and aarch64 as a conservative estimate that
/// accounts for spatial prefetching. Uses 64 bytes for other architectures.
const fn cache_line_size() -> usize {
    cfg_if::cfg_if! {
        if #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))] {
            128
        } else {
            64
        }
    }
}

/// A memory heap with a fixed budget, used as the device context of a [SystemBackend].
///
/// Clones share the same budget and usage.
#[derive(Clone, Debug)]
pub struct SystemDevice {
    inner: Arc<Heap>,
}

#[derive(Debug)]
struct Heap {
    budget: u64,
    used: AtomicU64,
}

impl SystemDevice {
    /// Creates a device that can back at most `budget` bytes at once.
    pub fn new(budget: u64) -> Self {
        Self {
            inner: Arc::new(Heap {
                budget,
                used: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the number of bytes this device can back.
    pub fn budget(&self) -> u64 {
        self.inner.budget
    }

    /// Returns the number of bytes currently backed.
    pub fn used(&self) -> u64 {
        self.inner.used.load(Ordering::Acquire)
    }

    fn charge(&self, bytes: u64) -> Result<(), Error> {
        let budget = self.inner.budget;
        self.inner
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= budget)
            })
            .map(|_| ())
            .map_err(|used| Error::OutOfMemory {
                requested: bytes,
                available: budget.saturating_sub(used),
            })
    }

    fn refund(&self, bytes: u64) {
        self.inner.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Handle to storage allocated by a [SystemBackend].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SystemHandle(u64);

/// An aligned, zero-initialized block of host memory.
///
/// Deallocates itself on drop using the stored layout.
struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
    capacity: u64,
    device: SystemDevice,
}

// SAFETY: Block owns its memory and can be sent between threads.
unsafe impl Send for Block {}
// SAFETY: Block's memory is only accessed through `&mut self` (behind the backend's lock).
unsafe impl Sync for Block {}

impl Block {
    fn new(capacity: u64, alignment: usize, device: SystemDevice) -> Result<Self, Error> {
        let size = usize::try_from(capacity)
            .map_err(|_| Error::InvalidCapacity(capacity))?
            .max(1);
        let layout =
            Layout::from_size_align(size, alignment).map_err(|_| Error::InvalidCapacity(capacity))?;

        // SAFETY: Layout is valid (non-zero size, power-of-two alignment).
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(Error::OutOfMemory {
            requested: capacity,
            available: 0,
        })?;

        Ok(Self {
            ptr,
            layout,
            capacity,
            device,
        })
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for `capacity` initialized bytes (capacity <= layout.size()).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity as usize) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for `capacity` initialized bytes and we hold `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity as usize) }
    }

    fn range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>, Error> {
        let out_of_bounds = Error::OutOfBounds {
            offset,
            len: len as u64,
            capacity: self.capacity,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds.clone())?;
        match start.checked_add(len) {
            Some(end) if end as u64 <= self.capacity => Ok(start..end),
            _ => Err(out_of_bounds),
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("capacity", &self.capacity)
            .field("alignment", &self.layout.align())
            .finish()
    }
}

/// A [MemoryBackend] that serves command buffers from aligned host memory.
///
/// Storage is charged against the [SystemDevice] it was allocated from. Growing a buffer moves
/// its contents to a larger block behind the same [SystemHandle], so callers observe an in-place
/// resize.
#[derive(Debug)]
pub struct SystemBackend {
    alignment: usize,
    next: AtomicU64,
    blocks: Mutex<HashMap<u64, Block>>,
}

impl Default for SystemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBackend {
    /// Creates a backend with cache-line aligned blocks.
    pub fn new() -> Self {
        Self {
            alignment: cache_line_size(),
            next: AtomicU64::new(0),
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a backend whose blocks are aligned to `alignment` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    pub fn with_alignment(alignment: NonZeroUsize) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "alignment must be a power of two"
        );
        Self {
            alignment: alignment.get(),
            ..Self::new()
        }
    }

    /// Copies `data` into the storage behind `handle`, starting at `offset`.
    pub fn write_at(&self, handle: &SystemHandle, offset: u64, data: &[u8]) -> Result<(), Error> {
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks.get_mut(&handle.0).ok_or(Error::UnknownHandle)?;
        let range = block.range(offset, data.len())?;
        block.as_mut_slice()[range].copy_from_slice(data);
        Ok(())
    }

    /// Fills `buf` from the storage behind `handle`, starting at `offset`.
    pub fn read_at(&self, handle: &SystemHandle, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let blocks = self.blocks.lock().unwrap();
        let block = blocks.get(&handle.0).ok_or(Error::UnknownHandle)?;
        let range = block.range(offset, buf.len())?;
        buf.copy_from_slice(&block.as_slice()[range]);
        Ok(())
    }

    /// Returns the number of live blocks.
    pub fn live(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    /// Returns the base address of the block behind `handle`, if it is live.
    #[cfg(test)]
    fn address(&self, handle: &SystemHandle) -> Option<usize> {
        let blocks = self.blocks.lock().unwrap();
        blocks.get(&handle.0).map(|block| block.ptr.as_ptr() as usize)
    }
}

impl MemoryBackend for SystemBackend {
    type Context = SystemDevice;
    type Handle = SystemHandle;

    fn allocate(&self, device: &SystemDevice, capacity: u64) -> Result<SystemHandle, Error> {
        device.charge(capacity)?;
        let block = match Block::new(capacity, self.alignment, device.clone()) {
            Ok(block) => block,
            Err(err) => {
                device.refund(capacity);
                return Err(err);
            }
        };
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.blocks.lock().unwrap().insert(id, block);
        Ok(SystemHandle(id))
    }

    fn resize(&self, handle: &SystemHandle, capacity: u64) -> Result<(), Error> {
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks.get_mut(&handle.0).ok_or(Error::UnknownHandle)?;
        if capacity <= block.capacity {
            return Ok(());
        }

        // Charge only the growth, the existing block is already accounted for
        let growth = capacity - block.capacity;
        block.device.charge(growth)?;
        let mut grown = match Block::new(capacity, self.alignment, block.device.clone()) {
            Ok(grown) => grown,
            Err(err) => {
                block.device.refund(growth);
                return Err(err);
            }
        };
        let len = block.capacity as usize;
        grown.as_mut_slice()[..len].copy_from_slice(block.as_slice());
        *block = grown;
        Ok(())
    }

    fn free(&self, handle: SystemHandle) {
        let Some(block) = self.blocks.lock().unwrap().remove(&handle.0) else {
            warn!(?handle, "free of unknown handle");
            return;
        };
        block.device.refund(block.capacity);
    }
}
