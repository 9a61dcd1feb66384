//! The buffer queue.
//!
//! A [`BufferQueue`] moves buffers between one producer and one consumer:
//! request, flush, acquire, release. Two variants implement it:
//! [`ExclusiveQueue`] runs the full per-slot state machine, and
//! [`SharedSlotQueue`] pins a single buffer that both sides use at once.
//! [`BufferQueueBuilder`] picks one.
//!
//! Each queue keeps its mutable state behind one lock. Allocator calls are
//! made with the lock held; listener callbacks run after it is released.

mod dump;
pub mod element;
mod exclusive;
pub mod listener;
mod shared;
pub mod slot_table;

pub use element::{BufferElement, BufferState, Slot, NO_FENCE};
pub use exclusive::ExclusiveQueue;
pub use listener::{ConsumerListener, ReleaseCallback};
pub use shared::SharedSlotQueue;
pub use slot_table::{Deletion, SlotTable};

use crate::allocator::{BufferAllocator, HeapAllocator};
use crate::buffer::SurfaceBuffer;
use crate::error::{SurfaceError, SurfaceResult};
use crate::extra_data::BufferExtraData;
use crate::identity::{SequenceSource, UniqueIdSource};
use crate::request::{BufferFlushConfig, BufferRequestConfig, BufferUsage};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use surface_core::config::{DumpConfig, QueueConfig};
use surface_core::limits::{SURFACE_MAX_HEIGHT, SURFACE_MAX_QUEUE_SIZE, SURFACE_MAX_WIDTH};
use surface_core::types::Rect;
use tracing::{debug, error, warn};

/// What a successful request hands back to the producer.
#[derive(Debug, Clone)]
pub struct RequestBufferReturnValue {
    /// The buffer, or `None` when the producer already has this sequence
    /// cached and nothing about it changed.
    pub buffer: Option<Arc<SurfaceBuffer>>,
    pub sequence: u32,
    /// Wait on this before writing; [`NO_FENCE`] for a fresh buffer.
    pub fence: i32,
    /// Sequences destroyed since the previous request. The producer should
    /// drop anything it holds for them.
    pub deleting_buffers: Vec<u32>,
    /// Extra data last attached to this buffer.
    pub extra_data: BufferExtraData,
}

/// What a successful acquire hands to the consumer.
#[derive(Debug, Clone)]
pub struct AcquiredBuffer {
    pub buffer: Arc<SurfaceBuffer>,
    pub fence: i32,
    pub timestamp: i64,
    pub damage: Rect,
}

#[derive(Debug, Clone, Copy)]
struct Defaults {
    width: i32,
    height: i32,
    usage: BufferUsage,
}

/// State shared by both queue variants: identity, allocator, listeners
/// and producer-facing defaults.
pub struct QueueCore {
    name: String,
    unique_id: u64,
    allocator: Arc<dyn BufferAllocator>,
    sequences: Arc<SequenceSource>,
    consumer_listener: RwLock<Option<Arc<dyn ConsumerListener>>>,
    release_callback: RwLock<Option<ReleaseCallback>>,
    defaults: RwLock<Defaults>,
    dump: DumpConfig,
}

impl QueueCore {
    fn new(
        name: String,
        unique_id: u64,
        allocator: Arc<dyn BufferAllocator>,
        sequences: Arc<SequenceSource>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            name,
            unique_id,
            allocator,
            sequences,
            consumer_listener: RwLock::new(None),
            release_callback: RwLock::new(None),
            defaults: RwLock::new(Defaults {
                width: config.default_width,
                height: config.default_height,
                usage: BufferUsage::from_bits_retain(config.default_usage),
            }),
            dump: config.dump.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn allocator(&self) -> &dyn BufferAllocator {
        self.allocator.as_ref()
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer_listener.read().is_some()
    }

    fn release_callback(&self) -> Option<ReleaseCallback> {
        self.release_callback.read().clone()
    }

    /// Tells the consumer a buffer is ready. Must be called without the
    /// queue lock held.
    fn notify_available(&self) {
        let listener = self.consumer_listener.read().clone();
        if let Some(listener) = listener {
            debug!(queue = %self.name, "on_buffer_available start");
            listener.on_buffer_available();
            debug!(queue = %self.name, "on_buffer_available end");
        }
    }

    /// Allocates and maps a new buffer. If mapping fails the allocation is
    /// freed again and the mapping error returned.
    fn alloc_buffer(&self, config: &BufferRequestConfig) -> SurfaceResult<Arc<SurfaceBuffer>> {
        let buffer = Arc::new(SurfaceBuffer::from_source(&self.sequences));
        let sequence = buffer.sequence();
        if let Err(e) = self.allocator.alloc(config, &buffer) {
            error!(queue = %self.name, sequence, error = %e, "alloc failed");
            return Err(e);
        }
        if let Err(e) = self.allocator.map(&buffer) {
            match self.allocator.free(&buffer) {
                Ok(()) => error!(queue = %self.name, sequence, error = %e, "map failed, free success"),
                Err(free_err) => error!(
                    queue = %self.name,
                    sequence,
                    error = %e,
                    free_error = %free_err,
                    "map failed, free failed"
                ),
            }
            return Err(e);
        }
        debug!(queue = %self.name, sequence, "buffer allocated and mapped");
        Ok(buffer)
    }

    /// Runs the allocator's cache flush, logging a failure.
    fn flush_cache(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        self.allocator.flush_cache(buffer).map_err(|e| {
            error!(queue = %self.name, sequence = buffer.sequence(), error = %e, "flush_cache failed");
            e
        })
    }

    /// Invokes the release callback, if any. `true` means the callback took
    /// the buffer over.
    fn release_taken_over(&self, buffer: &Arc<SurfaceBuffer>) -> bool {
        let Some(callback) = self.release_callback() else {
            return false;
        };
        match callback(buffer) {
            Ok(()) => {
                debug!(queue = %self.name, sequence = buffer.sequence(), "release callback took the buffer");
                true
            }
            Err(e) => {
                debug!(queue = %self.name, sequence = buffer.sequence(), error = %e, "release callback declined");
                false
            }
        }
    }

    fn dump_config(&self) -> &DumpConfig {
        &self.dump
    }
}

impl fmt::Debug for QueueCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueCore")
            .field("name", &self.name)
            .field("unique_id", &format_args!("{:#x}", self.unique_id))
            .field("has_consumer", &self.has_consumer())
            .field("dump", &self.dump)
            .finish()
    }
}

/// Timestamp for a flush: the producer's value, or now in microseconds.
fn flush_timestamp(config: &BufferFlushConfig) -> i64 {
    if config.timestamp == 0 {
        chrono::Utc::now().timestamp_micros()
    } else {
        config.timestamp
    }
}

/// The producer/consumer buffer exchange protocol.
pub trait BufferQueue: Send + Sync + fmt::Debug {
    /// State common to every variant.
    fn core(&self) -> &QueueCore;

    /// Prepares the allocator backend.
    fn init(&self) -> SurfaceResult<()> {
        self.core().allocator.init().map_err(|e| {
            error!(queue = %self.core().name, error = %e, "allocator init failed");
            e
        })
    }

    /// Hands the producer a buffer matching `config`.
    ///
    /// # Errors
    ///
    /// - [`SurfaceError::NoConsumer`] without a registered consumer listener.
    /// - [`SurfaceError::InvalidParam`] for a malformed config.
    /// - [`SurfaceError::NoBuffer`] when every slot is in use.
    /// - Allocator failures, unchanged.
    fn request_buffer(&self, config: &BufferRequestConfig) -> SurfaceResult<RequestBufferReturnValue>;

    /// Returns a requested buffer unused.
    fn cancel_buffer(&self, sequence: u32, extra_data: BufferExtraData) -> SurfaceResult<()>;

    /// Queues a filled buffer for the consumer and notifies it.
    ///
    /// Without a consumer a REQUESTED buffer is cancelled and
    /// [`SurfaceError::NoConsumer`] returned; an ATTACHED one stays attached.
    fn flush_buffer(
        &self,
        sequence: u32,
        extra_data: BufferExtraData,
        fence: i32,
        config: &BufferFlushConfig,
    ) -> SurfaceResult<()>;

    /// Takes the oldest flushed buffer. [`SurfaceError::NoBuffer`] means
    /// there is nothing to consume.
    fn acquire_buffer(&self) -> SurfaceResult<AcquiredBuffer>;

    /// Gives an acquired buffer back.
    fn release_buffer(&self, buffer: &Arc<SurfaceBuffer>, fence: i32) -> SurfaceResult<()>;

    /// Adopts a buffer allocated elsewhere.
    fn attach_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()>;

    /// Removes a buffer from the queue without freeing it.
    fn detach_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()>;

    fn set_queue_size(&self, queue_size: u32) -> SurfaceResult<()>;

    fn queue_size(&self) -> u32;

    /// Evicts up to `count` buffers: free ones first, then flushed ones,
    /// then marks in-use ones for deletion at their next transition.
    fn delete_buffers(&self, count: u32);

    /// Evicts as many buffers as the queue size.
    fn clean_cache(&self) -> SurfaceResult<()> {
        self.delete_buffers(self.queue_size());
        Ok(())
    }

    fn is_shared(&self) -> bool;

    /// Human-readable state of every list and slot.
    fn dump(&self) -> String;

    fn name(&self) -> &str {
        self.core().name()
    }

    /// `(pid << 32) | counter`, unique within the process.
    fn unique_id(&self) -> u64 {
        self.core().unique_id()
    }

    fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) -> SurfaceResult<()> {
        *self.core().consumer_listener.write() = Some(listener);
        Ok(())
    }

    fn unregister_consumer_listener(&self) -> SurfaceResult<()> {
        *self.core().consumer_listener.write() = None;
        Ok(())
    }

    fn register_release_listener(&self, callback: ReleaseCallback) -> SurfaceResult<()> {
        *self.core().release_callback.write() = Some(callback);
        Ok(())
    }

    fn unregister_release_listener(&self) -> SurfaceResult<()> {
        *self.core().release_callback.write() = None;
        Ok(())
    }

    /// # Errors
    ///
    /// [`SurfaceError::InvalidParam`] unless both values are in
    /// `(0, SURFACE_MAX_WIDTH]` and `(0, SURFACE_MAX_HEIGHT]`.
    fn set_default_width_and_height(&self, width: i32, height: i32) -> SurfaceResult<()> {
        if width <= 0 || width > SURFACE_MAX_WIDTH {
            warn!(queue = %self.name(), width, "default width out of range");
            return Err(SurfaceError::InvalidParam(format!(
                "default width (0, {}], now is {}",
                SURFACE_MAX_WIDTH, width
            )));
        }
        if height <= 0 || height > SURFACE_MAX_HEIGHT {
            warn!(queue = %self.name(), height, "default height out of range");
            return Err(SurfaceError::InvalidParam(format!(
                "default height (0, {}], now is {}",
                SURFACE_MAX_HEIGHT, height
            )));
        }
        let mut defaults = self.core().defaults.write();
        defaults.width = width;
        defaults.height = height;
        Ok(())
    }

    fn default_width(&self) -> i32 {
        self.core().defaults.read().width
    }

    fn default_height(&self) -> i32 {
        self.core().defaults.read().height
    }

    fn set_default_usage(&self, usage: BufferUsage) -> SurfaceResult<()> {
        self.core().defaults.write().usage = usage;
        Ok(())
    }

    fn default_usage(&self) -> BufferUsage {
        self.core().defaults.read().usage
    }
}

fn validate_queue_size(queue_size: u32) -> SurfaceResult<()> {
    if queue_size == 0 || queue_size > SURFACE_MAX_QUEUE_SIZE {
        return Err(SurfaceError::InvalidParam(format!(
            "queue size [1, {}], now is {}",
            SURFACE_MAX_QUEUE_SIZE, queue_size
        )));
    }
    Ok(())
}

/// Builds a queue of either variant.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use surface_buffer_queue::queue::BufferQueueBuilder;
/// use surface_buffer_queue::request::BufferRequestConfig;
///
/// let queue = BufferQueueBuilder::new("preview").build().unwrap();
/// queue.register_consumer_listener(Arc::new(|| {})).unwrap();
/// let requested = queue.request_buffer(&BufferRequestConfig::with_size(64, 64)).unwrap();
/// assert!(requested.buffer.is_some());
/// ```
pub struct BufferQueueBuilder {
    name: String,
    shared: bool,
    allocator: Option<Arc<dyn BufferAllocator>>,
    config: QueueConfig,
    sequences: Option<Arc<SequenceSource>>,
    unique_ids: Option<Arc<UniqueIdSource>>,
}

impl BufferQueueBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: false,
            allocator: None,
            config: QueueConfig::default(),
            sequences: None,
            unique_ids: None,
        }
    }

    /// Selects the single shared buffer variant.
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Defaults to a fresh [`HeapAllocator`].
    pub fn allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`SequenceSource::process_wide`].
    pub fn sequence_source(mut self, sequences: Arc<SequenceSource>) -> Self {
        self.sequences = Some(sequences);
        self
    }

    /// Defaults to [`UniqueIdSource::process_wide`].
    pub fn unique_id_source(mut self, unique_ids: Arc<UniqueIdSource>) -> Self {
        self.unique_ids = Some(unique_ids);
        self
    }

    /// # Errors
    ///
    /// [`SurfaceError::InvalidParam`] if the configured queue size is out of
    /// range, or the allocator's init error.
    pub fn build(self) -> SurfaceResult<Arc<dyn BufferQueue>> {
        let queue_size = if self.shared { 1 } else { self.config.default_queue_size };
        validate_queue_size(queue_size)?;

        let unique_id = self.unique_ids.unwrap_or_else(UniqueIdSource::process_wide).next();
        let core = QueueCore::new(
            self.name,
            unique_id,
            self.allocator.unwrap_or_else(HeapAllocator::shared),
            self.sequences.unwrap_or_else(SequenceSource::process_wide),
            &self.config,
        );

        let queue: Arc<dyn BufferQueue> = if self.shared {
            Arc::new(SharedSlotQueue::new(core))
        } else {
            Arc::new(ExclusiveQueue::new(core, queue_size))
        };
        queue.init()?;
        debug!(queue = %queue.name(), unique_id, shared = queue.is_shared(), "queue created");
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn queue() -> Arc<dyn BufferQueue> {
        BufferQueueBuilder::new("core-test")
            .unique_id_source(Arc::new(UniqueIdSource::with_pid(7)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_applies_config() {
        let config = QueueConfig {
            default_queue_size: 5,
            default_width: 640,
            default_height: 480,
            default_usage: BufferUsage::CPU_READ.bits(),
            ..QueueConfig::default()
        };
        let queue = BufferQueueBuilder::new("configured").config(config).build().unwrap();
        assert_eq!(queue.queue_size(), 5);
        assert_eq!(queue.default_width(), 640);
        assert_eq!(queue.default_height(), 480);
        assert_eq!(queue.default_usage(), BufferUsage::CPU_READ);
        assert_eq!(queue.name(), "configured");
        assert!(!queue.is_shared());
    }

    #[test]
    fn test_builder_rejects_bad_queue_size() {
        let config = QueueConfig { default_queue_size: 0, ..QueueConfig::default() };
        let result = BufferQueueBuilder::new("bad").config(config).build();
        assert!(matches!(result, Err(SurfaceError::InvalidParam(_))));
    }

    #[test]
    fn test_shared_builder_pins_queue_size() {
        let config = QueueConfig { default_queue_size: 4, ..QueueConfig::default() };
        let queue = BufferQueueBuilder::new("shared").shared(true).config(config).build().unwrap();
        assert!(queue.is_shared());
        assert_eq!(queue.queue_size(), 1);
    }

    #[test]
    fn test_unique_ids_carry_pid() {
        let ids = Arc::new(UniqueIdSource::with_pid(7));
        let a = BufferQueueBuilder::new("a").unique_id_source(Arc::clone(&ids)).build().unwrap();
        let b = BufferQueueBuilder::new("b").unique_id_source(ids).build().unwrap();
        assert_eq!(a.unique_id(), 7u64 << 32);
        assert_eq!(b.unique_id(), (7u64 << 32) | 1);
    }

    #[rstest]
    #[case(0, 100)]
    #[case(100, 0)]
    #[case(SURFACE_MAX_WIDTH + 1, 100)]
    #[case(100, SURFACE_MAX_HEIGHT + 1)]
    #[case(-5, 100)]
    fn test_set_default_width_and_height_rejects(#[case] width: i32, #[case] height: i32) {
        let queue = queue();
        assert!(matches!(
            queue.set_default_width_and_height(width, height),
            Err(SurfaceError::InvalidParam(_))
        ));
        assert_eq!(queue.default_width(), 0);
    }

    #[test]
    fn test_defaults_round_trip() {
        let queue = queue();
        queue.set_default_width_and_height(1280, 720).unwrap();
        queue.set_default_usage(BufferUsage::HW_RENDER | BufferUsage::MEM_DMA).unwrap();
        assert_eq!((queue.default_width(), queue.default_height()), (1280, 720));
        assert_eq!(queue.default_usage(), BufferUsage::HW_RENDER | BufferUsage::MEM_DMA);
    }

    #[test]
    fn test_listener_registration() {
        let queue = queue();
        assert!(!queue.core().has_consumer());
        queue.register_consumer_listener(Arc::new(|| {})).unwrap();
        assert!(queue.core().has_consumer());
        queue.unregister_consumer_listener().unwrap();
        assert!(!queue.core().has_consumer());
    }

    #[test]
    fn test_flush_timestamp_defaults_to_now() {
        let before = chrono::Utc::now().timestamp_micros();
        let stamped = flush_timestamp(&BufferFlushConfig::default());
        assert!(stamped >= before);
        let explicit = BufferFlushConfig { timestamp: 42, ..BufferFlushConfig::default() };
        assert_eq!(flush_timestamp(&explicit), 42);
    }
}
