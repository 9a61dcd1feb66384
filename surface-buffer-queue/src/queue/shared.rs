use super::dump;
use super::element::{BufferElement, BufferState, Slot, NO_FENCE};
use super::slot_table::{Deletion, SlotTable};
use super::{flush_timestamp, AcquiredBuffer, BufferQueue, QueueCore, RequestBufferReturnValue};
use crate::buffer::SurfaceBuffer;
use crate::error::{SurfaceError, SurfaceResult};
use crate::extra_data::BufferExtraData;
use crate::request::{BufferFlushConfig, BufferRequestConfig};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

struct SharedState {
    table: SlotTable,
    /// The single buffer both sides use, once allocated.
    slot: Option<u32>,
}

impl SharedState {
    /// The pinned sequence, if `sequence` is it.
    fn pinned(&self, sequence: u32) -> SurfaceResult<u32> {
        match self.slot {
            Some(pinned) if pinned == sequence && self.table.contains(pinned) => Ok(pinned),
            _ => Err(SurfaceError::NoEntry(format!(
                "sequence {} is not the shared buffer",
                sequence
            ))),
        }
    }

    fn delete_pinned(&mut self, sequence: u32, core: &QueueCore) {
        if self.table.delete(sequence, core.allocator()) == Deletion::Freed {
            self.slot = None;
        }
    }
}

/// Single-buffer queue for zero-copy surfaces.
///
/// Producer and consumer share one buffer. The queue size is fixed at 1 and
/// requests always return the same buffer; flush, acquire and release do
/// not enforce the per-slot state machine.
pub struct SharedSlotQueue {
    core: QueueCore,
    state: Mutex<SharedState>,
}

impl SharedSlotQueue {
    pub(super) fn new(core: QueueCore) -> Self {
        Self {
            core,
            state: Mutex::new(SharedState { table: SlotTable::new(1), slot: None }),
        }
    }

    fn not_in_shared_mode(operation: &str) -> SurfaceError {
        SurfaceError::InvalidOperating(format!("{} is not supported on a shared buffer", operation))
    }
}

impl BufferQueue for SharedSlotQueue {
    fn core(&self) -> &QueueCore {
        &self.core
    }

    fn request_buffer(&self, config: &BufferRequestConfig) -> SurfaceResult<RequestBufferReturnValue> {
        if !self.core.has_consumer() {
            warn!(queue = %self.core.name(), "request without consumer");
            return Err(SurfaceError::NoConsumer);
        }
        config.validate()?;

        let mut state = self.state.lock();
        if let Some(sequence) = state.slot {
            let pending_delete = state.table.find(sequence).is_some_and(|slot| slot.is_pending_delete());
            if pending_delete {
                state.delete_pinned(sequence, &self.core);
                if state.slot.is_some() {
                    debug!(queue = %self.core.name(), sequence, "shared buffer still held for deletion");
                    return Err(SurfaceError::NoBuffer);
                }
            }
        }

        if let Some(sequence) = state.slot {
            let element = match state.table.find_mut(sequence) {
                Some(slot) => slot.element_mut(),
                None => return Err(SurfaceError::NoEntry(format!("shared sequence {} missing", sequence))),
            };
            if element.config != *config {
                warn!(queue = %self.core.name(), sequence, "shared buffer config cannot change");
                return Err(SurfaceError::InvalidParam(
                    "the shared config does not equal the buffer config".to_string(),
                ));
            }
            // The consumer keeps ownership until it releases.
            if element.state != BufferState::Acquired {
                element.state = BufferState::Requested;
            }
            let buffer = Arc::clone(&element.buffer);
            let fence = element.fence;
            debug!(queue = %self.core.name(), sequence, "shared buffer");
            return Ok(RequestBufferReturnValue {
                extra_data: buffer.extra_data(),
                buffer: Some(buffer),
                sequence,
                fence,
                deleting_buffers: state.table.take_deleting(),
            });
        }

        let buffer = self.core.alloc_buffer(config)?;
        let sequence = buffer.sequence();
        state
            .table
            .insert(sequence, Slot::Live(BufferElement::requested(Arc::clone(&buffer), *config)));
        state.slot = Some(sequence);
        debug!(queue = %self.core.name(), sequence, "shared buffer allocated");
        Ok(RequestBufferReturnValue {
            extra_data: buffer.extra_data(),
            buffer: Some(buffer),
            sequence,
            fence: NO_FENCE,
            deleting_buffers: state.table.take_deleting(),
        })
    }

    fn cancel_buffer(&self, _sequence: u32, _extra_data: BufferExtraData) -> SurfaceResult<()> {
        Err(Self::not_in_shared_mode("cancel"))
    }

    fn flush_buffer(
        &self,
        sequence: u32,
        extra_data: BufferExtraData,
        fence: i32,
        config: &BufferFlushConfig,
    ) -> SurfaceResult<()> {
        config.validate()?;

        let buffer = {
            let mut state = self.state.lock();
            let sequence = state.pinned(sequence)?;
            if !self.core.has_consumer() {
                warn!(queue = %self.core.name(), sequence, "flush without consumer");
                return Err(SurfaceError::NoConsumer);
            }
            let slot = state
                .table
                .find(sequence)
                .ok_or_else(|| SurfaceError::NoEntry(format!("shared sequence {} missing", sequence)))?;
            if slot.is_pending_delete() {
                state.delete_pinned(sequence, &self.core);
                debug!(queue = %self.core.name(), sequence, "flushed shared buffer was pending delete");
                return Ok(());
            }
            let buffer = Arc::clone(&slot.element().buffer);
            self.core.flush_cache(&buffer)?;
            if let Some(slot) = state.table.find_mut(sequence) {
                let element = slot.element_mut();
                if element.state != BufferState::Acquired {
                    element.state = BufferState::Flushed;
                }
                element.fence = fence;
                element.damage = config.damage;
                element.timestamp = flush_timestamp(config);
            }
            buffer.set_extra_data(extra_data);
            buffer
        };

        debug!(queue = %self.core.name(), sequence, "flush");
        dump::dump_to_file(&self.core, &buffer);
        self.core.notify_available();
        Ok(())
    }

    fn acquire_buffer(&self) -> SurfaceResult<AcquiredBuffer> {
        let mut state = self.state.lock();
        let Some(sequence) = state.slot else {
            return Err(SurfaceError::NoBuffer);
        };
        let element = match state.table.find_mut(sequence) {
            Some(slot) => slot.element_mut(),
            None => return Err(SurfaceError::NoBuffer),
        };
        if !matches!(element.state, BufferState::Flushed | BufferState::Acquired) {
            warn!(queue = %self.core.name(), sequence, state = %element.state, "shared buffer is not FLUSHED");
        }
        element.state = BufferState::Acquired;
        Ok(AcquiredBuffer {
            buffer: Arc::clone(&element.buffer),
            fence: element.fence,
            timestamp: element.timestamp,
            damage: element.damage,
        })
    }

    fn release_buffer(&self, buffer: &Arc<SurfaceBuffer>, fence: i32) -> SurfaceResult<()> {
        let sequence = buffer.sequence();
        self.state.lock().pinned(sequence)?;

        if self.core.release_taken_over(buffer) {
            return Ok(());
        }

        let mut state = self.state.lock();
        let sequence = state.pinned(sequence)?;
        let pending_delete = match state.table.find_mut(sequence) {
            Some(slot) => {
                let element = slot.element_mut();
                element.state = BufferState::Released;
                element.fence = fence;
                slot.is_pending_delete()
            }
            None => false,
        };
        if pending_delete {
            state.delete_pinned(sequence, &self.core);
        }
        debug!(queue = %self.core.name(), sequence, "release");
        Ok(())
    }

    fn attach_buffer(&self, _buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        Err(Self::not_in_shared_mode("attach"))
    }

    fn detach_buffer(&self, _buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        Err(Self::not_in_shared_mode("detach"))
    }

    fn set_queue_size(&self, queue_size: u32) -> SurfaceResult<()> {
        if queue_size != 1 {
            return Err(SurfaceError::InvalidParam(format!(
                "shared queue size must be 1, now is {}",
                queue_size
            )));
        }
        Ok(())
    }

    fn queue_size(&self) -> u32 {
        1
    }

    fn delete_buffers(&self, count: u32) {
        let mut state = self.state.lock();
        state.table.delete_buffers(count, self.core.allocator());
        if let Some(sequence) = state.slot {
            if !state.table.contains(sequence) {
                state.slot = None;
            }
        }
    }

    fn is_shared(&self) -> bool {
        true
    }

    fn dump(&self) -> String {
        dump::render(&self.core, &self.state.lock().table, true)
    }
}

impl fmt::Debug for SharedSlotQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSlotQueue")
            .field("core", &self.core)
            .field("slot", &self.state.try_lock().map(|state| state.slot))
            .finish()
    }
}

impl Drop for SharedSlotQueue {
    fn drop(&mut self) {
        self.state.get_mut().table.clear(self.core.allocator());
    }
}
