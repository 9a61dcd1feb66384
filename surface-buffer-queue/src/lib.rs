//! Surface buffer queue.
//!
//! Moves graphics buffers between a producer that renders into them and a
//! consumer that reads them. The producer requests a buffer, fills it and
//! flushes it; the consumer acquires it, reads it and releases it back.
//! Buffers are identified by a process-unique sequence number and are reused
//! across frames until the queue shrinks or a request changes their shape.
//!
//! # Modules
//! - [`queue`]: the queue state machine and its two variants.
//! - [`surface`]: producer and consumer views on top of a queue.
//! - [`buffer`]: the shared buffer object.
//! - [`allocator`]: the memory backend seam and a heap implementation.
//! - [`request`]: request and flush parameters.
//! - [`extra_data`]: typed key/value metadata carried with a buffer.
//! - [`identity`]: sequence and unique id generation.
//! - [`error`]: the [`SurfaceError`] type.

pub mod allocator;
pub mod buffer;
pub mod error;
pub mod extra_data;
pub mod identity;
pub mod queue;
pub mod request;
pub mod surface;

pub use allocator::{BufferAllocator, HeapAllocator};
pub use buffer::{BufferHandle, SurfaceBuffer};
pub use error::{SurfaceError, SurfaceResult};
pub use extra_data::{BufferExtraData, ExtraValue};
pub use queue::{
    AcquiredBuffer, BufferQueue, BufferQueueBuilder, BufferState, ConsumerListener, ReleaseCallback,
    RequestBufferReturnValue, NO_FENCE,
};
pub use request::{BufferFlushConfig, BufferRequestConfig, BufferUsage, PixelFormat};
pub use surface::{ConsumerSurface, ProducerBuffer, ProducerSurface};
