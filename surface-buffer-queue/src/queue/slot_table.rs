//! The queue's state store.
//!
//! Holds every slot keyed by sequence plus the free, dirty and deleting
//! lists. It has no lock of its own; the owning queue holds one around every
//! access. Physical destruction of a slot goes through [`SlotTable::delete`]
//! only, which refuses to free a buffer the consumer still holds.

use super::element::{BufferState, Slot};
use crate::allocator::BufferAllocator;
use crate::buffer::SurfaceBuffer;
use crate::request::BufferRequestConfig;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

/// Result of asking the table to destroy a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    /// Unmapped, freed and erased; the sequence is now in the deleting list.
    Freed,
    /// The consumer holds the buffer; the slot is now `PendingDelete`.
    Deferred,
    /// No such sequence.
    Missing,
}

/// Unmaps and frees `buffer`, logging failures instead of returning them.
pub(crate) fn release_memory(allocator: &dyn BufferAllocator, buffer: &SurfaceBuffer) {
    if let Err(e) = allocator.unmap(buffer) {
        warn!(sequence = buffer.sequence(), error = %e, "unmap failed, freeing anyway");
    }
    if let Err(e) = allocator.free(buffer) {
        warn!(sequence = buffer.sequence(), error = %e, "free failed");
    }
}

#[derive(Debug)]
pub struct SlotTable {
    slots: BTreeMap<u32, Slot>,
    free: VecDeque<u32>,
    dirty: VecDeque<u32>,
    deleting: Vec<u32>,
    queue_size: u32,
}

impl SlotTable {
    pub fn new(queue_size: u32) -> Self {
        Self {
            slots: BTreeMap::new(),
            free: VecDeque::new(),
            dirty: VecDeque::new(),
            deleting: Vec::new(),
            queue_size,
        }
    }

    pub fn queue_size(&self) -> u32 {
        self.queue_size
    }

    pub fn set_queue_size(&mut self, queue_size: u32) {
        self.queue_size = queue_size;
    }

    /// Number of slots in the table, whatever their state.
    pub fn used_size(&self) -> u32 {
        u32::try_from(self.slots.len()).unwrap_or(u32::MAX)
    }

    pub fn is_full(&self) -> bool {
        self.used_size() >= self.queue_size
    }

    pub fn find(&self, sequence: u32) -> Option<&Slot> {
        self.slots.get(&sequence)
    }

    pub fn find_mut(&mut self, sequence: u32) -> Option<&mut Slot> {
        self.slots.get_mut(&sequence)
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.slots.contains_key(&sequence)
    }

    pub fn insert(&mut self, sequence: u32, slot: Slot) {
        self.slots.insert(sequence, slot);
    }

    /// Slots in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Slot)> {
        self.slots.iter().map(|(sequence, slot)| (*sequence, slot))
    }

    pub fn push_free(&mut self, sequence: u32) {
        self.free.push_back(sequence);
    }

    /// Puts a sequence back at the head of the free list.
    pub fn restore_free(&mut self, sequence: u32) {
        self.free.push_front(sequence);
    }

    /// Takes the first free sequence whose cached config equals `config`,
    /// or failing that the oldest free sequence (which then needs a realloc).
    pub fn pop_free(&mut self, config: &BufferRequestConfig) -> Option<u32> {
        let slots = &self.slots;
        let position = self
            .free
            .iter()
            .position(|sequence| slots.get(sequence).is_some_and(|slot| slot.element().config == *config))
            .unwrap_or(0);
        self.free.remove(position)
    }

    pub fn push_dirty(&mut self, sequence: u32) {
        self.dirty.push_back(sequence);
    }

    pub fn pop_dirty(&mut self) -> Option<u32> {
        self.dirty.pop_front()
    }

    pub fn free_list(&self) -> impl Iterator<Item = u32> + '_ {
        self.free.iter().copied()
    }

    pub fn dirty_list(&self) -> impl Iterator<Item = u32> + '_ {
        self.dirty.iter().copied()
    }

    pub fn deleting_list(&self) -> impl Iterator<Item = u32> + '_ {
        self.deleting.iter().copied()
    }

    /// Hands out and clears the sequences destroyed since the last call.
    pub fn take_deleting(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.deleting)
    }

    /// Marks a slot for deletion without touching its memory.
    pub fn mark_deleting(&mut self, sequence: u32) -> bool {
        match self.slots.get_mut(&sequence) {
            Some(slot) => {
                slot.mark_pending_delete();
                true
            }
            None => false,
        }
    }

    /// Removes a slot without freeing its buffer. Ownership of the memory
    /// moves to whoever holds the buffer.
    pub fn erase(&mut self, sequence: u32) -> Option<Slot> {
        self.free.retain(|s| *s != sequence);
        self.dirty.retain(|s| *s != sequence);
        self.slots.remove(&sequence)
    }

    /// Destroys a slot: unmap, free, erase, and record the sequence in the
    /// deleting list. An `Acquired` slot is only marked `PendingDelete`.
    pub fn delete(&mut self, sequence: u32, allocator: &dyn BufferAllocator) -> Deletion {
        let Some(slot) = self.slots.get_mut(&sequence) else {
            return Deletion::Missing;
        };
        if slot.state() == BufferState::Acquired {
            slot.mark_pending_delete();
            debug!(sequence, "buffer held by consumer, deletion deferred");
            return Deletion::Deferred;
        }
        if let Some(slot) = self.erase(sequence) {
            release_memory(allocator, &slot.element().buffer);
        }
        self.deleting.push(sequence);
        debug!(sequence, "buffer deleted");
        Deletion::Freed
    }

    /// Evicts up to `count` buffers: free list first, then dirty list,
    /// then marks the remaining live slots in sequence order for deletion.
    pub fn delete_buffers(&mut self, count: u32, allocator: &dyn BufferAllocator) {
        let mut remaining = count;
        while remaining > 0 {
            let Some(sequence) = self.free.pop_front() else {
                break;
            };
            self.delete(sequence, allocator);
            remaining -= 1;
        }
        while remaining > 0 {
            let Some(sequence) = self.dirty.pop_front() else {
                break;
            };
            self.delete(sequence, allocator);
            remaining -= 1;
        }
        if remaining == 0 {
            return;
        }
        let live: Vec<u32> = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.is_pending_delete())
            .map(|(sequence, _)| *sequence)
            .take(remaining as usize)
            .collect();
        for sequence in live {
            self.mark_deleting(sequence);
            debug!(sequence, "marked for deletion");
        }
    }

    /// Frees every buffer in the table. Used when the queue goes away.
    pub fn clear(&mut self, allocator: &dyn BufferAllocator) {
        for (_, slot) in std::mem::take(&mut self.slots) {
            release_memory(allocator, &slot.element().buffer);
        }
        self.free.clear();
        self.dirty.clear();
        self.deleting.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;
    use crate::queue::element::BufferElement;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn table_with(allocator: &HeapAllocator, sequences: &[u32], config: BufferRequestConfig) -> SlotTable {
        let mut table = SlotTable::new(8);
        for &sequence in sequences {
            let buffer = Arc::new(SurfaceBuffer::new(sequence));
            allocator.alloc(&config, &buffer).unwrap();
            allocator.map(&buffer).unwrap();
            table.insert(sequence, Slot::Live(BufferElement::requested(buffer, config)));
        }
        table
    }

    fn set_state(table: &mut SlotTable, sequence: u32, state: BufferState) {
        table.find_mut(sequence).unwrap().element_mut().state = state;
    }

    #[test]
    fn test_pop_free_prefers_exact_config() {
        let allocator = HeapAllocator::new();
        let small = BufferRequestConfig::with_size(4, 4);
        let large = BufferRequestConfig::with_size(8, 8);
        let mut table = table_with(&allocator, &[0], small);
        let extra = Arc::new(SurfaceBuffer::new(1));
        table.insert(1, Slot::Live(BufferElement::requested(extra, large)));
        table.push_free(0);
        table.push_free(1);

        assert_eq!(table.pop_free(&large), Some(1));
        assert_eq!(table.pop_free(&large), Some(0), "falls back to the oldest entry");
        assert_eq!(table.pop_free(&large), None);
    }

    #[test]
    fn test_dirty_list_is_fifo() {
        let mut table = SlotTable::new(3);
        table.push_dirty(5);
        table.push_dirty(2);
        assert_eq!(table.pop_dirty(), Some(5));
        assert_eq!(table.pop_dirty(), Some(2));
        assert_eq!(table.pop_dirty(), None);
    }

    #[test]
    fn test_delete_frees_and_records() {
        let allocator = HeapAllocator::new();
        let mut table = table_with(&allocator, &[0, 1], BufferRequestConfig::with_size(4, 4));
        table.push_free(0);

        assert_eq!(table.delete(0, &allocator), Deletion::Freed);
        assert!(!table.contains(0));
        assert_eq!(table.free_list().count(), 0);
        assert_eq!(allocator.allocated_count(), 1);
        assert_eq!(table.take_deleting(), vec![0]);
        assert!(table.take_deleting().is_empty());
        assert_eq!(table.delete(0, &allocator), Deletion::Missing);
    }

    #[test]
    fn test_delete_defers_acquired_slot() {
        let allocator = HeapAllocator::new();
        let mut table = table_with(&allocator, &[0], BufferRequestConfig::with_size(4, 4));
        set_state(&mut table, 0, BufferState::Acquired);

        assert_eq!(table.delete(0, &allocator), Deletion::Deferred);
        assert!(table.find(0).unwrap().is_pending_delete());
        assert_eq!(allocator.allocated_count(), 1);
        assert!(table.take_deleting().is_empty());

        set_state(&mut table, 0, BufferState::Released);
        assert_eq!(table.delete(0, &allocator), Deletion::Freed);
        assert_eq!(table.take_deleting(), vec![0]);
    }

    #[test]
    fn test_delete_buffers_order() {
        let allocator = HeapAllocator::new();
        let mut table = table_with(&allocator, &[0, 1, 2, 3], BufferRequestConfig::with_size(4, 4));
        set_state(&mut table, 0, BufferState::Acquired);
        set_state(&mut table, 1, BufferState::Flushed);
        table.push_dirty(1);
        set_state(&mut table, 2, BufferState::Released);
        table.push_free(2);

        table.delete_buffers(3, &allocator);

        assert_eq!(table.take_deleting(), vec![2, 1]);
        assert!(table.find(0).unwrap().is_pending_delete());
        assert!(!table.find(3).unwrap().is_pending_delete());
        assert_eq!(allocator.allocated_count(), 2);
    }

    #[test]
    fn test_delete_buffers_zero_is_noop() {
        let allocator = HeapAllocator::new();
        let mut table = table_with(&allocator, &[0], BufferRequestConfig::with_size(4, 4));
        table.push_free(0);
        table.delete_buffers(0, &allocator);
        assert!(table.contains(0));
    }

    #[test]
    fn test_erase_keeps_memory() {
        let allocator = HeapAllocator::new();
        let mut table = table_with(&allocator, &[0], BufferRequestConfig::with_size(4, 4));
        let slot = table.erase(0).unwrap();
        assert!(!slot.element().buffer.is_null());
        assert_eq!(allocator.allocated_count(), 1);
        assert!(table.take_deleting().is_empty());
    }

    #[test]
    fn test_clear_frees_everything() {
        let allocator = HeapAllocator::new();
        let mut table = table_with(&allocator, &[0, 1, 2], BufferRequestConfig::with_size(4, 4));
        table.push_free(1);
        table.clear(&allocator);
        assert_eq!(table.used_size(), 0);
        assert_eq!(allocator.allocated_count(), 0);
    }
}
