//! Per-slot records.

use crate::buffer::SurfaceBuffer;
use crate::request::BufferRequestConfig;
use std::fmt;
use std::sync::Arc;
use surface_core::types::Rect;

/// Fence value meaning "nothing to wait for".
pub const NO_FENCE: i32 = -1;

/// Where a slot is in the producer/consumer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Handed to the producer.
    Requested,
    /// Filled and queued for the consumer.
    Flushed,
    /// Held by the consumer.
    Acquired,
    /// Back in the free list.
    Released,
    /// Brought in from outside the queue.
    Attached,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BufferState::Requested => "REQUESTED",
            BufferState::Flushed => "FLUSHED",
            BufferState::Acquired => "ACQUIRED",
            BufferState::Released => "RELEASED",
            BufferState::Attached => "ATTACHED",
        };
        f.write_str(name)
    }
}

/// One cached buffer and everything the queue knows about it.
#[derive(Debug, Clone)]
pub struct BufferElement {
    pub buffer: Arc<SurfaceBuffer>,
    pub state: BufferState,
    /// The request this buffer was allocated for.
    pub config: BufferRequestConfig,
    pub fence: i32,
    pub damage: Rect,
    pub timestamp: i64,
}

impl BufferElement {
    /// A freshly allocated slot, handed straight to the producer.
    pub fn requested(buffer: Arc<SurfaceBuffer>, config: BufferRequestConfig) -> Self {
        Self {
            buffer,
            state: BufferState::Requested,
            config,
            fence: NO_FENCE,
            damage: Rect::default(),
            timestamp: 0,
        }
    }
}

/// A table entry. A `PendingDelete` slot still works through the protocol
/// but is destroyed instead of recycled at its next opportunity.
#[derive(Debug, Clone)]
pub enum Slot {
    Live(BufferElement),
    PendingDelete(BufferElement),
}

impl Slot {
    pub fn element(&self) -> &BufferElement {
        match self {
            Slot::Live(element) | Slot::PendingDelete(element) => element,
        }
    }

    pub fn element_mut(&mut self) -> &mut BufferElement {
        match self {
            Slot::Live(element) | Slot::PendingDelete(element) => element,
        }
    }

    pub fn state(&self) -> BufferState {
        self.element().state
    }

    pub fn is_pending_delete(&self) -> bool {
        matches!(self, Slot::PendingDelete(_))
    }

    /// Converts the slot to `PendingDelete`, keeping its element.
    pub fn mark_pending_delete(&mut self) {
        if let Slot::Live(element) = self {
            let element = element.clone();
            *self = Slot::PendingDelete(element);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn element() -> BufferElement {
        BufferElement::requested(Arc::new(SurfaceBuffer::new(3)), BufferRequestConfig::with_size(8, 8))
    }

    #[test]
    fn test_requested_element_defaults() {
        let element = element();
        assert_eq!(element.state, BufferState::Requested);
        assert_eq!(element.fence, NO_FENCE);
        assert_eq!(element.damage, Rect::default());
    }

    #[test]
    fn test_mark_pending_delete_preserves_element() {
        let mut slot = Slot::Live(element());
        slot.element_mut().state = BufferState::Acquired;
        slot.mark_pending_delete();
        assert!(slot.is_pending_delete());
        assert_eq!(slot.state(), BufferState::Acquired);
        assert_eq!(slot.element().buffer.sequence(), 3);

        slot.mark_pending_delete();
        assert!(slot.is_pending_delete());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BufferState::Acquired.to_string(), "ACQUIRED");
    }
}
