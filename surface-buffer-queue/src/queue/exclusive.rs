use super::dump;
use super::element::{BufferElement, BufferState, Slot, NO_FENCE};
use super::slot_table::SlotTable;
use super::{
    flush_timestamp, validate_queue_size, AcquiredBuffer, BufferQueue, QueueCore, RequestBufferReturnValue,
};
use crate::buffer::SurfaceBuffer;
use crate::error::{SurfaceError, SurfaceResult};
use crate::extra_data::BufferExtraData;
use crate::request::{BufferFlushConfig, BufferRequestConfig};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use surface_core::types::Rect;
use tracing::{debug, warn};

/// Stride alignment recorded for attached buffers.
const ATTACH_STRIDE_ALIGNMENT: i32 = 8;

fn no_entry(sequence: u32, reason: &str) -> SurfaceError {
    SurfaceError::NoEntry(format!("sequence {}: {}", sequence, reason))
}

/// What a flush did, decided under the lock and acted on after it.
enum FlushOutcome {
    Queued(Arc<SurfaceBuffer>),
    Deleted,
}

/// The general queue: every slot follows the full state machine.
pub struct ExclusiveQueue {
    core: QueueCore,
    table: Mutex<SlotTable>,
}

impl ExclusiveQueue {
    pub(super) fn new(core: QueueCore, queue_size: u32) -> Self {
        Self {
            core,
            table: Mutex::new(SlotTable::new(queue_size)),
        }
    }

    /// Hands out a free slot, reallocating it first if its config differs.
    fn reuse_buffer(
        &self,
        table: &mut SlotTable,
        sequence: u32,
        config: &BufferRequestConfig,
    ) -> SurfaceResult<RequestBufferReturnValue> {
        let cached_config = table
            .find(sequence)
            .map(|slot| slot.element().config)
            .ok_or_else(|| no_entry(sequence, "free slot missing from cache"))?;

        if cached_config != *config {
            let buffer = match self.core.alloc_buffer(config) {
                Ok(buffer) => buffer,
                Err(e) => {
                    table.restore_free(sequence);
                    warn!(queue = %self.core.name(), sequence, "realloc failed");
                    return Err(e);
                }
            };
            table.delete(sequence, self.core.allocator());
            let new_sequence = buffer.sequence();
            table.insert(new_sequence, Slot::Live(BufferElement::requested(Arc::clone(&buffer), *config)));
            debug!(queue = %self.core.name(), old = sequence, sequence = new_sequence, "config change, realloc");
            return Ok(RequestBufferReturnValue {
                extra_data: buffer.extra_data(),
                buffer: Some(buffer),
                sequence: new_sequence,
                fence: NO_FENCE,
                deleting_buffers: table.take_deleting(),
            });
        }

        let element = match table.find_mut(sequence) {
            Some(slot) => slot.element_mut(),
            None => return Err(no_entry(sequence, "free slot missing from cache")),
        };
        element.state = BufferState::Requested;
        let fence = element.fence;
        let extra_data = element.buffer.extra_data();
        debug!(queue = %self.core.name(), sequence, "buffer cache hit");
        Ok(RequestBufferReturnValue {
            buffer: None,
            sequence,
            fence,
            deleting_buffers: table.take_deleting(),
            extra_data,
        })
    }

    /// Cancel with the lock already held.
    fn cancel_locked(&self, table: &mut SlotTable, sequence: u32, extra_data: BufferExtraData) -> SurfaceResult<()> {
        let slot = table
            .find_mut(sequence)
            .ok_or_else(|| no_entry(sequence, "not found in cache"))?;
        if slot.state() != BufferState::Requested {
            return Err(SurfaceError::InvalidOperating(format!(
                "sequence {}: state is {}, not REQUESTED",
                sequence,
                slot.state()
            )));
        }
        let pending_delete = slot.is_pending_delete();
        let element = slot.element_mut();
        element.state = BufferState::Released;
        element.buffer.set_extra_data(extra_data);

        if pending_delete {
            table.delete(sequence, self.core.allocator());
        } else {
            table.push_free(sequence);
        }
        debug!(queue = %self.core.name(), sequence, "cancel");
        Ok(())
    }

    fn check_release_state(table: &SlotTable, sequence: u32) -> SurfaceResult<()> {
        let slot = table
            .find(sequence)
            .ok_or_else(|| no_entry(sequence, "not found in cache"))?;
        match slot.state() {
            BufferState::Acquired | BufferState::Attached => Ok(()),
            state => Err(no_entry(sequence, &format!("state is {}, not ACQUIRED or ATTACHED", state))),
        }
    }
}

impl BufferQueue for ExclusiveQueue {
    fn core(&self) -> &QueueCore {
        &self.core
    }

    fn request_buffer(&self, config: &BufferRequestConfig) -> SurfaceResult<RequestBufferReturnValue> {
        if !self.core.has_consumer() {
            warn!(queue = %self.core.name(), "request without consumer");
            return Err(SurfaceError::NoConsumer);
        }
        config.validate().map_err(|e| {
            warn!(queue = %self.core.name(), error = %e, "invalid request config");
            e
        })?;

        let mut table = self.table.lock();
        if let Some(sequence) = table.pop_free(config) {
            return self.reuse_buffer(&mut table, sequence, config);
        }

        if table.is_full() {
            debug!(queue = %self.core.name(), used = table.used_size(), "all buffers are in use");
            return Err(SurfaceError::NoBuffer);
        }

        let buffer = self.core.alloc_buffer(config)?;
        let sequence = buffer.sequence();
        table.insert(sequence, Slot::Live(BufferElement::requested(Arc::clone(&buffer), *config)));
        debug!(queue = %self.core.name(), sequence, "alloc");
        Ok(RequestBufferReturnValue {
            extra_data: buffer.extra_data(),
            buffer: Some(buffer),
            sequence,
            fence: NO_FENCE,
            deleting_buffers: table.take_deleting(),
        })
    }

    fn cancel_buffer(&self, sequence: u32, extra_data: BufferExtraData) -> SurfaceResult<()> {
        let mut table = self.table.lock();
        self.cancel_locked(&mut table, sequence, extra_data)
    }

    fn flush_buffer(
        &self,
        sequence: u32,
        extra_data: BufferExtraData,
        fence: i32,
        config: &BufferFlushConfig,
    ) -> SurfaceResult<()> {
        config.validate()?;

        let outcome = {
            let mut table = self.table.lock();
            let (state, pending_delete, buffer) = table
                .find(sequence)
                .map(|slot| (slot.state(), slot.is_pending_delete(), Arc::clone(&slot.element().buffer)))
                .ok_or_else(|| no_entry(sequence, "not found in cache"))?;
            if state != BufferState::Requested && state != BufferState::Attached {
                return Err(no_entry(sequence, &format!("state is {}, not REQUESTED or ATTACHED", state)));
            }

            if !self.core.has_consumer() {
                if let Err(e) = self.cancel_locked(&mut table, sequence, extra_data) {
                    warn!(queue = %self.core.name(), sequence, state = %state, error = %e, "auto-cancel skipped");
                }
                warn!(queue = %self.core.name(), sequence, "flush without consumer, buffer cancelled");
                return Err(SurfaceError::NoConsumer);
            }

            if pending_delete {
                table.delete(sequence, self.core.allocator());
                FlushOutcome::Deleted
            } else {
                self.core.flush_cache(&buffer)?;

                let element = match table.find_mut(sequence) {
                    Some(slot) => slot.element_mut(),
                    None => return Err(no_entry(sequence, "not found in cache")),
                };
                element.state = BufferState::Flushed;
                element.fence = fence;
                element.damage = config.damage;
                element.timestamp = flush_timestamp(config);
                buffer.set_extra_data(extra_data);
                table.push_dirty(sequence);
                FlushOutcome::Queued(buffer)
            }
        };

        match outcome {
            FlushOutcome::Queued(buffer) => {
                debug!(queue = %self.core.name(), sequence, "flush");
                dump::dump_to_file(&self.core, &buffer);
                self.core.notify_available();
            }
            FlushOutcome::Deleted => {
                debug!(queue = %self.core.name(), sequence, "flushed buffer was pending delete, deleted");
            }
        }
        Ok(())
    }

    fn acquire_buffer(&self) -> SurfaceResult<AcquiredBuffer> {
        let mut table = self.table.lock();
        let Some(sequence) = table.pop_dirty() else {
            debug!(queue = %self.core.name(), "there is no dirty buffer");
            return Err(SurfaceError::NoBuffer);
        };
        let element = match table.find_mut(sequence) {
            Some(slot) => slot.element_mut(),
            None => return Err(no_entry(sequence, "dirty sequence missing from cache")),
        };
        if element.state != BufferState::Flushed {
            warn!(queue = %self.core.name(), sequence, state = %element.state, "acquired buffer is not FLUSHED");
        }
        element.state = BufferState::Acquired;
        debug!(queue = %self.core.name(), sequence, "acquire");
        Ok(AcquiredBuffer {
            buffer: Arc::clone(&element.buffer),
            fence: element.fence,
            timestamp: element.timestamp,
            damage: element.damage,
        })
    }

    fn release_buffer(&self, buffer: &Arc<SurfaceBuffer>, fence: i32) -> SurfaceResult<()> {
        let sequence = buffer.sequence();
        Self::check_release_state(&self.table.lock(), sequence)?;

        if self.core.release_taken_over(buffer) {
            return Ok(());
        }

        let mut table = self.table.lock();
        // The slot may have moved on while the callback ran.
        Self::check_release_state(&table, sequence)?;
        let slot = table
            .find_mut(sequence)
            .ok_or_else(|| no_entry(sequence, "not found in cache"))?;
        let pending_delete = slot.is_pending_delete();
        let element = slot.element_mut();
        element.state = BufferState::Released;
        element.fence = fence;

        if pending_delete {
            table.delete(sequence, self.core.allocator());
            debug!(queue = %self.core.name(), sequence, "release of pending delete buffer, deleted");
        } else {
            table.push_free(sequence);
            debug!(queue = %self.core.name(), sequence, "release, pushed to free list");
        }
        Ok(())
    }

    fn attach_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        if buffer.is_null() {
            return Err(SurfaceError::NullPtr);
        }
        let sequence = buffer.sequence();
        let (width, height) = (buffer.width(), buffer.height());
        let element = BufferElement {
            buffer: Arc::clone(buffer),
            state: BufferState::Attached,
            config: BufferRequestConfig {
                width,
                height,
                stride_alignment: ATTACH_STRIDE_ALIGNMENT,
                format: buffer.format(),
                usage: buffer.usage(),
                timeout: 0,
            },
            fence: NO_FENCE,
            damage: Rect::from_size(width, height),
            timestamp: 0,
        };

        let mut table = self.table.lock();
        if table.contains(sequence) {
            return Err(SurfaceError::InvalidOperating(format!(
                "sequence {} is already in the queue",
                sequence
            )));
        }

        if table.is_full() {
            let needed = table.used_size() - table.queue_size() + 1;
            let evictable = u32::try_from(table.free_list().count() + table.dirty_list().count()).unwrap_or(u32::MAX);
            if evictable < needed {
                warn!(queue = %self.core.name(), sequence, needed, evictable, "queue is full, cannot attach");
                return Err(SurfaceError::OutOfRange(format!(
                    "need {} evictable buffers to attach, have {}",
                    needed, evictable
                )));
            }
            table.delete_buffers(needed, self.core.allocator());
        }

        table.insert(sequence, Slot::Live(element));
        debug!(queue = %self.core.name(), sequence, "attach");
        Ok(())
    }

    fn detach_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        let sequence = buffer.sequence();
        let mut table = self.table.lock();
        let slot = table
            .find(sequence)
            .ok_or_else(|| no_entry(sequence, "not found in cache"))?;
        match slot.state() {
            BufferState::Requested | BufferState::Acquired => {}
            state => return Err(no_entry(sequence, &format!("state is {}, not REQUESTED or ACQUIRED", state))),
        }
        table.erase(sequence);
        debug!(queue = %self.core.name(), sequence, "detach");
        Ok(())
    }

    fn set_queue_size(&self, queue_size: u32) -> SurfaceResult<()> {
        validate_queue_size(queue_size)?;
        let mut table = self.table.lock();
        let old = table.queue_size();
        if old > queue_size {
            table.delete_buffers(old - queue_size, self.core.allocator());
        }
        table.set_queue_size(queue_size);
        debug!(queue = %self.core.name(), queue_size, "queue size set");
        Ok(())
    }

    fn queue_size(&self) -> u32 {
        self.table.lock().queue_size()
    }

    fn delete_buffers(&self, count: u32) {
        self.table.lock().delete_buffers(count, self.core.allocator());
    }

    fn is_shared(&self) -> bool {
        false
    }

    fn dump(&self) -> String {
        dump::render(&self.core, &self.table.lock(), false)
    }
}

impl fmt::Debug for ExclusiveQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveQueue").field("core", &self.core).finish_non_exhaustive()
    }
}

impl Drop for ExclusiveQueue {
    fn drop(&mut self) {
        self.table.get_mut().clear(self.core.allocator());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{BufferAllocator, HeapAllocator};
    use crate::identity::SequenceSource;
    use crate::queue::BufferQueueBuilder;
    use pretty_assertions::assert_eq;
    use surface_core::config::QueueConfig;

    fn build(allocator: Arc<HeapAllocator>, queue_size: u32) -> Arc<dyn BufferQueue> {
        let queue = BufferQueueBuilder::new("exclusive-test")
            .allocator(allocator)
            .sequence_source(Arc::new(SequenceSource::new()))
            .config(QueueConfig { default_queue_size: queue_size, ..QueueConfig::default() })
            .build()
            .unwrap();
        queue.register_consumer_listener(Arc::new(|| {})).unwrap();
        queue
    }

    fn state_of(queue: &Arc<dyn BufferQueue>, sequence: u32) -> Option<String> {
        queue
            .dump()
            .lines()
            .find(|line| line.trim_start().starts_with(&format!("sequence {}:", sequence)))
            .map(|line| line.to_string())
    }

    #[test]
    fn test_request_without_consumer() {
        let queue = BufferQueueBuilder::new("lonely").build().unwrap();
        let result = queue.request_buffer(&BufferRequestConfig::with_size(8, 8));
        assert_eq!(result.unwrap_err(), SurfaceError::NoConsumer);
    }

    #[test]
    fn test_invalid_config_allocates_nothing() {
        let allocator = Arc::new(HeapAllocator::new());
        let queue = build(Arc::clone(&allocator), 3);
        let result = queue.request_buffer(&BufferRequestConfig::with_size(0, 8));
        assert!(matches!(result, Err(SurfaceError::InvalidParam(_))));
        assert_eq!(allocator.allocated_count(), 0);
    }

    #[test]
    fn test_fresh_request_has_no_fence() {
        let queue = build(Arc::new(HeapAllocator::new()), 3);
        let requested = queue.request_buffer(&BufferRequestConfig::with_size(8, 8)).unwrap();
        assert_eq!(requested.fence, NO_FENCE);
        assert!(requested.buffer.unwrap().is_mapped());
        assert!(requested.deleting_buffers.is_empty());
    }

    #[test]
    fn test_flush_unknown_sequence() {
        let queue = build(Arc::new(HeapAllocator::new()), 3);
        let result = queue.flush_buffer(99, BufferExtraData::new(), NO_FENCE, &BufferFlushConfig::default());
        assert!(matches!(result, Err(SurfaceError::NoEntry(_))));
    }

    #[test]
    fn test_flush_invalid_damage_leaves_state() {
        let queue = build(Arc::new(HeapAllocator::new()), 3);
        let requested = queue.request_buffer(&BufferRequestConfig::with_size(8, 8)).unwrap();
        let flush = BufferFlushConfig { damage: Rect::new(0, 0, -1, 1), timestamp: 0 };
        let result = queue.flush_buffer(requested.sequence, BufferExtraData::new(), NO_FENCE, &flush);
        assert!(matches!(result, Err(SurfaceError::InvalidParam(_))));
        assert!(state_of(&queue, requested.sequence).unwrap().contains("state=REQUESTED"));
    }

    #[test]
    fn test_acquire_records_flush_metadata() {
        let queue = build(Arc::new(HeapAllocator::new()), 3);
        let requested = queue.request_buffer(&BufferRequestConfig::with_size(8, 8)).unwrap();
        let flush = BufferFlushConfig { damage: Rect::new(1, 2, 3, 4), timestamp: 1234 };
        queue.flush_buffer(requested.sequence, BufferExtraData::new(), 5, &flush).unwrap();

        let acquired = queue.acquire_buffer().unwrap();
        assert_eq!(acquired.buffer.sequence(), requested.sequence);
        assert_eq!(acquired.fence, 5);
        assert_eq!(acquired.timestamp, 1234);
        assert_eq!(acquired.damage, Rect::new(1, 2, 3, 4));
        assert_eq!(queue.acquire_buffer().unwrap_err(), SurfaceError::NoBuffer);
    }

    #[test]
    fn test_release_fence_returned_on_reuse() {
        let queue = build(Arc::new(HeapAllocator::new()), 3);
        let config = BufferRequestConfig::with_size(8, 8);
        let requested = queue.request_buffer(&config).unwrap();
        queue
            .flush_buffer(requested.sequence, BufferExtraData::new(), NO_FENCE, &BufferFlushConfig::default())
            .unwrap();
        let acquired = queue.acquire_buffer().unwrap();
        queue.release_buffer(&acquired.buffer, 17).unwrap();

        let again = queue.request_buffer(&config).unwrap();
        assert_eq!(again.sequence, requested.sequence);
        assert_eq!(again.fence, 17);
    }

    #[test]
    fn test_release_wrong_state() {
        let queue = build(Arc::new(HeapAllocator::new()), 3);
        let requested = queue.request_buffer(&BufferRequestConfig::with_size(8, 8)).unwrap();
        let buffer = requested.buffer.unwrap();
        assert!(matches!(queue.release_buffer(&buffer, NO_FENCE), Err(SurfaceError::NoEntry(_))));
    }

    #[test]
    fn test_set_queue_size_bounds() {
        let queue = build(Arc::new(HeapAllocator::new()), 3);
        assert!(matches!(queue.set_queue_size(0), Err(SurfaceError::InvalidParam(_))));
        assert!(matches!(queue.set_queue_size(33), Err(SurfaceError::InvalidParam(_))));
        queue.set_queue_size(32).unwrap();
        assert_eq!(queue.queue_size(), 32);
    }

    #[test]
    fn test_drop_frees_all_buffers() {
        let allocator = Arc::new(HeapAllocator::new());
        {
            let queue = build(Arc::clone(&allocator), 3);
            queue.request_buffer(&BufferRequestConfig::with_size(8, 8)).unwrap();
            queue.request_buffer(&BufferRequestConfig::with_size(8, 8)).unwrap();
            assert_eq!(allocator.allocated_count(), 2);
        }
        assert_eq!(allocator.allocated_count(), 0);
    }

    #[test]
    fn test_flush_without_consumer_leaves_attached_buffer() {
        let allocator = Arc::new(HeapAllocator::new());
        let queue = build(Arc::clone(&allocator), 3);
        let buffer = Arc::new(SurfaceBuffer::new(700_001));
        allocator.alloc(&BufferRequestConfig::with_size(8, 8), &buffer).unwrap();
        allocator.map(&buffer).unwrap();
        queue.attach_buffer(&buffer).unwrap();
        queue.unregister_consumer_listener().unwrap();

        let result = queue.flush_buffer(700_001, BufferExtraData::new(), NO_FENCE, &BufferFlushConfig::default());
        assert_eq!(result.unwrap_err(), SurfaceError::NoConsumer);
        assert!(state_of(&queue, 700_001).unwrap().contains("state=ATTACHED"));
    }

    #[test]
    fn test_flush_of_pending_delete_buffer_deletes_it() {
        let allocator = Arc::new(HeapAllocator::new());
        let queue = BufferQueueBuilder::new("exclusive-test")
            .allocator(allocator.clone())
            .sequence_source(Arc::new(SequenceSource::new()))
            .build()
            .unwrap();
        let notified = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        queue
            .register_consumer_listener(Arc::new(move || {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }))
            .unwrap();
        let requested = queue.request_buffer(&BufferRequestConfig::with_size(8, 8)).unwrap();
        queue.delete_buffers(1);
        assert!(state_of(&queue, requested.sequence).unwrap().contains("pending_delete=true"));

        queue
            .flush_buffer(requested.sequence, BufferExtraData::new(), NO_FENCE, &BufferFlushConfig::default())
            .unwrap();
        assert!(state_of(&queue, requested.sequence).is_none());
        assert_eq!(allocator.allocated_count(), 0);
        assert_eq!(notified.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(queue.acquire_buffer().unwrap_err(), SurfaceError::NoBuffer);
    }
}
