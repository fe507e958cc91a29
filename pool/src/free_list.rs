use crate::buffer::{Buffer, BufferHandle};

/// Free buffers ordered by capacity, largest first.
///
/// Entries are stored in ascending order so the largest can be taken from the back without
/// shifting the rest. Iteration yields the largest first.
pub(crate) struct FreeList<H> {
    buffers: Vec<Buffer<H>>,
}

impl<H> FreeList<H> {
    pub const fn new() -> Self {
        Self {
            buffers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Returns the free buffer with the largest capacity.
    pub fn largest(&self) -> Option<&Buffer<H>> {
        self.buffers.last()
    }

    /// Removes and returns the free buffer with the largest capacity.
    pub fn take_largest(&mut self) -> Option<Buffer<H>> {
        self.buffers.pop()
    }

    /// Removes and returns the largest free buffer if it holds at least `capacity` bytes.
    ///
    /// Only the largest buffer is inspected: if it is too small, every other one is too.
    pub fn take_fitting(&mut self, capacity: u64) -> Option<Buffer<H>> {
        if self.largest()?.capacity() < capacity {
            return None;
        }
        self.take_largest()
    }

    /// Inserts `buffer` ahead of the first entry with a strictly smaller capacity.
    pub fn insert(&mut self, buffer: Buffer<H>) {
        let capacity = buffer.capacity();
        let index = self.buffers.partition_point(|b| b.capacity() < capacity);
        self.buffers.insert(index, buffer);
    }

    /// Appends a batch of buffers, then restores the ordering.
    pub fn extend(&mut self, batch: impl IntoIterator<Item = Buffer<H>>) {
        self.buffers.extend(batch);
        self.buffers.sort_by_key(Buffer::capacity);
    }

    /// Removes the buffer `handle` currently leases, if it is free.
    pub fn remove(&mut self, handle: &BufferHandle<H>) -> Option<Buffer<H>> {
        let index = self.buffers.iter().position(|b| b.is_leased_by(handle))?;
        Some(self.buffers.remove(index))
    }

    /// Iterates from the largest to the smallest free buffer.
    pub fn iter(&self) -> impl Iterator<Item = &Buffer<H>> {
        self.buffers.iter().rev()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Buffer<H>> + '_ {
        self.buffers.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferId;

    fn buffer(id: u64, capacity: u64) -> Buffer<u64> {
        Buffer::from_parts(BufferId::from_raw(id), capacity, id)
    }

    fn capacities(list: &FreeList<u64>) -> Vec<u64> {
        list.iter().map(Buffer::capacity).collect()
    }

    #[test]
    fn test_largest_first() {
        let mut list = FreeList::new();
        assert!(list.largest().is_none());

        list.insert(buffer(0, 256));
        list.insert(buffer(1, 1024));
        list.insert(buffer(2, 512));
        assert_eq!(capacities(&list), vec![1024, 512, 256]);
        assert_eq!(list.largest().unwrap().capacity(), 1024);

        let taken = list.take_largest().unwrap();
        assert_eq!(taken.capacity(), 1024);
        assert_eq!(capacities(&list), vec![512, 256]);
    }

    #[test]
    fn test_take_fitting() {
        let mut list = FreeList::new();
        list.insert(buffer(0, 256));
        list.insert(buffer(1, 512));

        // Largest is too small, so nothing is taken
        assert!(list.take_fitting(1024).is_none());
        assert_eq!(capacities(&list), vec![512, 256]);

        // Largest fits even when a smaller one would too
        let taken = list.take_fitting(128).unwrap();
        assert_eq!(taken.capacity(), 512);
        assert_eq!(capacities(&list), vec![256]);
    }

    #[test]
    fn test_ties_follow_existing_entries() {
        let mut list = FreeList::new();
        list.insert(buffer(0, 512));
        list.insert(buffer(1, 512));
        list.insert(buffer(2, 1024));

        // The newest 512 sits behind the older one
        let ids: Vec<u64> = list.iter().map(|b| b.id().get()).collect();
        assert_eq!(ids, vec![2, 0, 1]);
    }

    #[test]
    fn test_extend_resorts() {
        let mut list = FreeList::new();
        list.insert(buffer(0, 300));
        list.extend(vec![buffer(1, 100), buffer(2, 900), buffer(3, 300)]);
        assert_eq!(capacities(&list), vec![900, 300, 300, 100]);
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_remove_by_lease() {
        let mut list = FreeList::new();
        let mut small = buffer(0, 100);
        let stale = small.lease();
        let current = small.lease();
        list.insert(small);
        list.insert(buffer(1, 200));

        // A handle from an earlier lease does not match
        assert!(list.remove(&stale).is_none());
        assert_eq!(list.len(), 2);

        let removed = list.remove(&current).unwrap();
        assert_eq!(removed.capacity(), 100);
        assert!(list.remove(&current).is_none());
        assert_eq!(capacities(&list), vec![200]);

        let drained: Vec<_> = list.drain().collect();
        assert_eq!(drained.len(), 1);
        assert!(list.is_empty());
    }
}
