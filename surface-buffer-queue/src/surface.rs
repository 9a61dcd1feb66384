//! Producer and consumer views of a queue.
//!
//! A [`ConsumerSurface`] owns the consumer side of a queue and can hand out
//! any number of [`ProducerSurface`]s for it. The producer side keeps its own
//! cache of buffers by sequence, since the queue returns no buffer on a
//! cache hit.

use crate::buffer::SurfaceBuffer;
use crate::error::{SurfaceError, SurfaceResult};
use crate::queue::{AcquiredBuffer, BufferQueue, ConsumerListener, ReleaseCallback};
use crate::request::{BufferFlushConfig, BufferRequestConfig, BufferUsage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use surface_core::limits::SURFACE_MAX_USER_DATA_COUNT;
use tracing::{debug, warn};

/// String key/value pairs attached to a surface.
#[derive(Debug, Default)]
struct UserData(RwLock<HashMap<String, String>>);

impl UserData {
    fn set(&self, key: &str, value: &str) -> SurfaceResult<()> {
        let mut map = self.0.write();
        if !map.contains_key(key) && map.len() >= SURFACE_MAX_USER_DATA_COUNT {
            return Err(SurfaceError::OutOfRange(format!(
                "at most {} user data entries per surface",
                SURFACE_MAX_USER_DATA_COUNT
            )));
        }
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        self.0.read().get(key).cloned()
    }
}

/// A buffer handed to the producer, ready to be written.
#[derive(Debug, Clone)]
pub struct ProducerBuffer {
    pub buffer: Arc<SurfaceBuffer>,
    /// Wait on this before writing.
    pub fence: i32,
}

/// The producer side of a queue.
#[derive(Debug)]
pub struct ProducerSurface {
    queue: Arc<dyn BufferQueue>,
    cache: Mutex<HashMap<u32, Arc<SurfaceBuffer>>>,
    user_data: UserData,
}

impl ProducerSurface {
    pub fn new(queue: Arc<dyn BufferQueue>) -> Self {
        Self {
            queue,
            cache: Mutex::new(HashMap::new()),
            user_data: UserData::default(),
        }
    }

    /// Requests a buffer, resolving cache hits to the producer's copy.
    ///
    /// The buffer's CPU cache is invalidated, its extra data restored, and
    /// any buffers the queue has since destroyed are dropped from the cache.
    ///
    /// # Errors
    ///
    /// Whatever the queue's request returns, or [`SurfaceError::NoEntry`] if
    /// the queue reports a cache hit for a sequence this producer never saw.
    pub fn request_buffer(&self, config: &BufferRequestConfig) -> SurfaceResult<ProducerBuffer> {
        let retval = self.queue.request_buffer(config)?;
        let sequence = retval.sequence;

        let mut cache = self.cache.lock();
        let buffer = match retval.buffer {
            Some(buffer) => {
                cache.insert(sequence, Arc::clone(&buffer));
                buffer
            }
            None => match cache.get(&sequence).cloned() {
                Some(buffer) => buffer,
                None => {
                    drop(cache);
                    warn!(queue = %self.queue.name(), sequence, "cache hit for an unknown buffer");
                    if let Err(e) = self.queue.cancel_buffer(sequence, retval.extra_data) {
                        warn!(sequence, error = %e, "returning unknown buffer failed");
                    }
                    return Err(SurfaceError::NoEntry(format!(
                        "sequence {} is not in the producer cache",
                        sequence
                    )));
                }
            },
        };

        if let Err(e) = self.queue.core().allocator().invalidate_cache(&buffer) {
            warn!(sequence, error = %e, "invalidate_cache failed");
        }
        buffer.set_extra_data(retval.extra_data);

        for deleted in &retval.deleting_buffers {
            cache.remove(deleted);
        }
        debug!(queue = %self.queue.name(), sequence, evicted = retval.deleting_buffers.len(), "producer request");

        Ok(ProducerBuffer {
            buffer,
            fence: retval.fence,
        })
    }

    /// Returns a requested buffer unused, with its current extra data.
    pub fn cancel_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        self.queue.cancel_buffer(buffer.sequence(), buffer.extra_data())
    }

    /// Queues a filled buffer, with its current extra data, for the consumer.
    pub fn flush_buffer(&self, buffer: &Arc<SurfaceBuffer>, fence: i32, config: &BufferFlushConfig) -> SurfaceResult<()> {
        self.queue
            .flush_buffer(buffer.sequence(), buffer.extra_data(), fence, config)
    }

    pub fn queue_size(&self) -> u32 {
        self.queue.queue_size()
    }

    pub fn set_queue_size(&self, queue_size: u32) -> SurfaceResult<()> {
        self.queue.set_queue_size(queue_size)
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub fn unique_id(&self) -> u64 {
        self.queue.unique_id()
    }

    pub fn default_width(&self) -> i32 {
        self.queue.default_width()
    }

    pub fn default_height(&self) -> i32 {
        self.queue.default_height()
    }

    pub fn default_usage(&self) -> BufferUsage {
        self.queue.default_usage()
    }

    pub fn register_release_listener(&self, callback: ReleaseCallback) -> SurfaceResult<()> {
        self.queue.register_release_listener(callback)
    }

    pub fn unregister_release_listener(&self) -> SurfaceResult<()> {
        self.queue.unregister_release_listener()
    }

    /// Evicts the queue's buffers and forgets every cached one.
    pub fn clean_cache(&self) -> SurfaceResult<()> {
        self.cache.lock().clear();
        self.queue.clean_cache()
    }

    /// Number of buffers the producer currently knows by sequence.
    pub fn cached_buffer_count(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_cached(&self, sequence: u32) -> bool {
        self.cache.lock().contains_key(&sequence)
    }

    /// # Errors
    ///
    /// [`SurfaceError::OutOfRange`] when adding a key past
    /// `SURFACE_MAX_USER_DATA_COUNT` entries.
    pub fn set_user_data(&self, key: &str, value: &str) -> SurfaceResult<()> {
        self.user_data.set(key, value)
    }

    pub fn get_user_data(&self, key: &str) -> Option<String> {
        self.user_data.get(key)
    }
}

/// The consumer side of a queue.
#[derive(Debug)]
pub struct ConsumerSurface {
    queue: Arc<dyn BufferQueue>,
    user_data: UserData,
}

impl ConsumerSurface {
    pub fn new(queue: Arc<dyn BufferQueue>) -> Self {
        Self {
            queue,
            user_data: UserData::default(),
        }
    }

    /// A new producer view of the same queue.
    pub fn producer(&self) -> ProducerSurface {
        ProducerSurface::new(Arc::clone(&self.queue))
    }

    pub fn queue(&self) -> &Arc<dyn BufferQueue> {
        &self.queue
    }

    pub fn acquire_buffer(&self) -> SurfaceResult<AcquiredBuffer> {
        self.queue.acquire_buffer()
    }

    pub fn release_buffer(&self, buffer: &Arc<SurfaceBuffer>, fence: i32) -> SurfaceResult<()> {
        self.queue.release_buffer(buffer, fence)
    }

    pub fn attach_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        self.queue.attach_buffer(buffer)
    }

    pub fn detach_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        self.queue.detach_buffer(buffer)
    }

    pub fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) -> SurfaceResult<()> {
        self.queue.register_consumer_listener(listener)
    }

    pub fn unregister_consumer_listener(&self) -> SurfaceResult<()> {
        self.queue.unregister_consumer_listener()
    }

    pub fn set_default_width_and_height(&self, width: i32, height: i32) -> SurfaceResult<()> {
        self.queue.set_default_width_and_height(width, height)
    }

    pub fn default_width(&self) -> i32 {
        self.queue.default_width()
    }

    pub fn default_height(&self) -> i32 {
        self.queue.default_height()
    }

    pub fn set_default_usage(&self, usage: BufferUsage) -> SurfaceResult<()> {
        self.queue.set_default_usage(usage)
    }

    pub fn default_usage(&self) -> BufferUsage {
        self.queue.default_usage()
    }

    pub fn queue_size(&self) -> u32 {
        self.queue.queue_size()
    }

    pub fn set_queue_size(&self, queue_size: u32) -> SurfaceResult<()> {
        self.queue.set_queue_size(queue_size)
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub fn unique_id(&self) -> u64 {
        self.queue.unique_id()
    }

    pub fn is_shared(&self) -> bool {
        self.queue.is_shared()
    }

    pub fn dump(&self) -> String {
        self.queue.dump()
    }

    pub fn set_user_data(&self, key: &str, value: &str) -> SurfaceResult<()> {
        self.user_data.set(key, value)
    }

    pub fn get_user_data(&self, key: &str) -> Option<String> {
        self.user_data.get(key)
    }
}
