//! The allocation gateway.
//!
//! The queue never touches graphics memory itself; it asks a
//! [`BufferAllocator`] to allocate, map, flush and free. All calls are made
//! while the queue's lock is held, so implementations must not call back
//! into the queue.

use crate::buffer::{BufferHandle, PixelMemory, SurfaceBuffer};
use crate::error::{SurfaceError, SurfaceResult};
use crate::request::BufferRequestConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Allocator and mapper for surface buffers.
pub trait BufferAllocator: Send + Sync {
    /// Prepares the backend. Called once when a queue is built.
    fn init(&self) -> SurfaceResult<()> {
        Ok(())
    }

    /// Allocates memory satisfying `config` and installs its handle into `buffer`.
    fn alloc(&self, config: &BufferRequestConfig, buffer: &SurfaceBuffer) -> SurfaceResult<()>;

    /// Installs a CPU mapping of the buffer's memory.
    fn map(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()>;

    /// Removes the CPU mapping.
    fn unmap(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()>;

    /// Makes CPU writes visible to other users of the memory.
    fn flush_cache(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()>;

    /// Makes writes by other users visible to the CPU.
    fn invalidate_cache(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()>;

    /// Releases the memory and removes the handle. Must tolerate a prior
    /// failed `unmap`.
    fn free(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()>;
}

const FIRST_HEAP_FD: i32 = 1000;

/// Process-local allocator backed by heap memory.
///
/// Stride is `width * bytes_per_pixel` rounded up to the requested
/// alignment. File descriptors are synthetic and never reused.
pub struct HeapAllocator {
    allocations: Mutex<HashMap<i32, PixelMemory>>,
    next_fd: AtomicI32,
    flushes: AtomicU64,
    invalidations: AtomicU64,
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self {
            allocations: Mutex::new(HashMap::new()),
            next_fd: AtomicI32::new(FIRST_HEAP_FD),
            flushes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the allocator as a shared gateway.
    pub fn shared() -> Arc<dyn BufferAllocator> {
        Arc::new(Self::new())
    }

    /// Number of live allocations.
    pub fn allocated_count(&self) -> usize {
        self.allocations.lock().len()
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn invalidate_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    fn layout(config: &BufferRequestConfig) -> SurfaceResult<(i32, u32)> {
        let row_bytes = u64::from(config.width.unsigned_abs()) * u64::from(config.format.bytes_per_pixel());
        let align = u64::from(config.stride_alignment.max(1).unsigned_abs());
        let stride = row_bytes.div_ceil(align) * align;
        let rows = (u64::from(config.height.unsigned_abs()) * u64::from(config.format.plane_height_factor())).div_ceil(2);
        let size = stride.checked_mul(rows);
        match (i32::try_from(stride), size.and_then(|size| u32::try_from(size).ok())) {
            (Ok(stride), Some(size)) => Ok((stride, size)),
            _ => Err(SurfaceError::NoMemory(format!(
                "{}x{} buffer does not fit in 4 GiB",
                config.width, config.height
            ))),
        }
    }

    fn require_handle(buffer: &SurfaceBuffer) -> SurfaceResult<BufferHandle> {
        buffer.handle().ok_or(SurfaceError::NullPtr)
    }
}

impl BufferAllocator for HeapAllocator {
    fn alloc(&self, config: &BufferRequestConfig, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        if !buffer.is_null() {
            return Err(SurfaceError::InvalidOperating(format!(
                "buffer {} is already allocated",
                buffer.sequence()
            )));
        }
        let (stride, size) = Self::layout(config)?;
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.allocations
            .lock()
            .insert(fd, Arc::new(Mutex::new(vec![0u8; size as usize])));
        buffer.set_handle(Some(BufferHandle {
            fd,
            width: config.width,
            stride,
            height: config.height,
            size,
            format: config.format,
            usage: config.usage,
            phy_addr: 0,
            key: 0,
        }));
        debug!(sequence = buffer.sequence(), fd, stride, size, "heap buffer allocated");
        Ok(())
    }

    fn map(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        let handle = Self::require_handle(buffer)?;
        let memory = self
            .allocations
            .lock()
            .get(&handle.fd)
            .cloned()
            .ok_or_else(|| SurfaceError::NoEntry(format!("fd {} is not a heap allocation", handle.fd)))?;
        buffer.set_mapping(Some(memory));
        Ok(())
    }

    fn unmap(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        Self::require_handle(buffer)?;
        buffer.set_mapping(None);
        Ok(())
    }

    fn flush_cache(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        Self::require_handle(buffer)?;
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn invalidate_cache(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        Self::require_handle(buffer)?;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn free(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        let handle = Self::require_handle(buffer)?;
        buffer.set_mapping(None);
        buffer.set_handle(None);
        match self.allocations.lock().remove(&handle.fd) {
            Some(_) => Ok(()),
            None => Err(SurfaceError::NoEntry(format!("fd {} is not a heap allocation", handle.fd))),
        }
    }
}

impl fmt::Debug for HeapAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("allocated", &self.allocated_count())
            .field("flushes", &self.flush_count())
            .field("invalidations", &self.invalidate_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::PixelFormat;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(PixelFormat::RGBA_8888, 10, 8, 40, 400)]
    #[case(PixelFormat::RGB_888, 10, 8, 32, 320)]
    #[case(PixelFormat::RGB_565, 3, 4, 8, 80)]
    #[case(PixelFormat::YCBCR_420_SP, 16, 4, 16, 240)]
    fn test_layout(
        #[case] format: PixelFormat,
        #[case] width: i32,
        #[case] stride_alignment: i32,
        #[case] expected_stride: i32,
        #[case] expected_size: u32,
    ) {
        let config = BufferRequestConfig {
            width,
            height: 10,
            stride_alignment,
            format,
            ..BufferRequestConfig::default()
        };
        assert_eq!(HeapAllocator::layout(&config), Ok((expected_stride, expected_size)));
    }

    #[test]
    fn test_alloc_map_free_cycle() {
        let allocator = HeapAllocator::new();
        let buffer = SurfaceBuffer::new(0);
        let config = BufferRequestConfig::with_size(4, 4);

        allocator.alloc(&config, &buffer).unwrap();
        assert_eq!(buffer.width(), 4);
        assert_eq!(buffer.stride(), 16);
        assert_eq!(buffer.size(), 64);
        assert_eq!(allocator.allocated_count(), 1);

        allocator.map(&buffer).unwrap();
        buffer.write_pixels(0, &[0xff; 4]).unwrap();
        assert_eq!(&buffer.read_pixels().unwrap()[..5], &[0xff, 0xff, 0xff, 0xff, 0]);

        allocator.unmap(&buffer).unwrap();
        assert!(!buffer.is_mapped());
        allocator.free(&buffer).unwrap();
        assert!(buffer.is_null());
        assert_eq!(allocator.allocated_count(), 0);
    }

    #[test]
    fn test_file_descriptors_are_unique() {
        let allocator = HeapAllocator::new();
        let a = SurfaceBuffer::new(0);
        let b = SurfaceBuffer::new(1);
        let config = BufferRequestConfig::with_size(1, 1);
        allocator.alloc(&config, &a).unwrap();
        allocator.alloc(&config, &b).unwrap();
        assert_ne!(a.file_descriptor(), b.file_descriptor());
    }

    #[test]
    fn test_operations_on_null_buffer() {
        let allocator = HeapAllocator::new();
        let buffer = SurfaceBuffer::new(0);
        assert_eq!(allocator.map(&buffer), Err(SurfaceError::NullPtr));
        assert_eq!(allocator.flush_cache(&buffer), Err(SurfaceError::NullPtr));
        assert_eq!(allocator.free(&buffer), Err(SurfaceError::NullPtr));
    }

    #[test]
    fn test_double_alloc_rejected() {
        let allocator = HeapAllocator::new();
        let buffer = SurfaceBuffer::new(0);
        let config = BufferRequestConfig::with_size(2, 2);
        allocator.alloc(&config, &buffer).unwrap();
        assert!(matches!(allocator.alloc(&config, &buffer), Err(SurfaceError::InvalidOperating(_))));
    }

    #[test]
    fn test_cache_counters() {
        let allocator = HeapAllocator::new();
        let buffer = SurfaceBuffer::new(0);
        allocator.alloc(&BufferRequestConfig::with_size(2, 2), &buffer).unwrap();
        allocator.flush_cache(&buffer).unwrap();
        allocator.flush_cache(&buffer).unwrap();
        allocator.invalidate_cache(&buffer).unwrap();
        assert_eq!(allocator.flush_count(), 2);
        assert_eq!(allocator.invalidate_count(), 1);
    }

    #[test]
    fn test_oversized_allocation_is_no_memory() {
        let config = BufferRequestConfig {
            width: i32::MAX,
            height: i32::MAX,
            ..BufferRequestConfig::default()
        };
        assert!(matches!(HeapAllocator::layout(&config), Err(SurfaceError::NoMemory(_))));
    }
}
