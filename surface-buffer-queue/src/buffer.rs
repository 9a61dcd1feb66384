//! Surface buffers and their backing handles.
//!
//! A [`SurfaceBuffer`] is shared between the queue, the producer and the
//! consumer through `Arc`. Its identity is the immutable sequence number;
//! everything the allocator provides (handle, CPU mapping) can be installed
//! and removed over the buffer's lifetime.

use crate::error::{SurfaceError, SurfaceResult};
use crate::extra_data::BufferExtraData;
use crate::identity::SequenceSource;
use crate::request::{BufferUsage, PixelFormat};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use surface_core::limits::SURFACE_MAX_USER_DATA_COUNT;

/// CPU-visible pixel storage installed by an allocator's `map`.
pub type PixelMemory = Arc<Mutex<Vec<u8>>>;

/// Description of allocated graphics memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferHandle {
    /// File descriptor (or synthetic id) of the allocation.
    pub fd: i32,
    pub width: i32,
    /// Bytes per row.
    pub stride: i32,
    pub height: i32,
    /// Total size in bytes.
    pub size: u32,
    pub format: PixelFormat,
    pub usage: BufferUsage,
    pub phy_addr: u64,
    pub key: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UserValue {
    Int32(i32),
    Int64(i64),
}

#[derive(Default)]
struct Storage {
    handle: Option<BufferHandle>,
    mapping: Option<PixelMemory>,
}

/// A graphics buffer exchanged through a queue.
pub struct SurfaceBuffer {
    sequence: u32,
    storage: RwLock<Storage>,
    extra_data: RwLock<BufferExtraData>,
    user_data: RwLock<HashMap<u32, UserValue>>,
}

impl SurfaceBuffer {
    /// Creates an empty buffer (no handle) with an explicit sequence.
    pub fn new(sequence: u32) -> Self {
        Self {
            sequence,
            storage: RwLock::new(Storage::default()),
            extra_data: RwLock::new(BufferExtraData::default()),
            user_data: RwLock::new(HashMap::new()),
        }
    }

    /// Creates an empty buffer taking the next sequence from `source`.
    pub fn from_source(source: &SequenceSource) -> Self {
        Self::new(source.next())
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The allocator handle, or `None` for a buffer that was never
    /// allocated or has been freed.
    pub fn handle(&self) -> Option<BufferHandle> {
        self.storage.read().handle
    }

    /// Installs or removes the allocator handle. Used by allocators.
    pub fn set_handle(&self, handle: Option<BufferHandle>) {
        self.storage.write().handle = handle;
    }

    /// Returns `true` if the buffer carries no handle.
    pub fn is_null(&self) -> bool {
        self.storage.read().handle.is_none()
    }

    /// The current CPU mapping, if the buffer is mapped.
    pub fn mapping(&self) -> Option<PixelMemory> {
        self.storage.read().mapping.clone()
    }

    /// Installs or removes the CPU mapping. Used by allocators.
    pub fn set_mapping(&self, mapping: Option<PixelMemory>) {
        self.storage.write().mapping = mapping;
    }

    pub fn is_mapped(&self) -> bool {
        self.storage.read().mapping.is_some()
    }

    fn handle_field<T: Default>(&self, f: impl FnOnce(&BufferHandle) -> T) -> T {
        self.storage.read().handle.as_ref().map(f).unwrap_or_default()
    }

    /// Width in pixels; 0 without a handle.
    pub fn width(&self) -> i32 {
        self.handle_field(|h| h.width)
    }

    /// Height in pixels; 0 without a handle.
    pub fn height(&self) -> i32 {
        self.handle_field(|h| h.height)
    }

    /// Bytes per row; 0 without a handle.
    pub fn stride(&self) -> i32 {
        self.handle_field(|h| h.stride)
    }

    pub fn format(&self) -> PixelFormat {
        self.handle_field(|h| h.format)
    }

    pub fn usage(&self) -> BufferUsage {
        self.handle_field(|h| h.usage)
    }

    /// Size in bytes; 0 without a handle.
    pub fn size(&self) -> u32 {
        self.handle_field(|h| h.size)
    }

    /// File descriptor; -1 without a handle.
    pub fn file_descriptor(&self) -> i32 {
        self.storage.read().handle.as_ref().map_or(-1, |h| h.fd)
    }

    pub fn phy_addr(&self) -> u64 {
        self.handle_field(|h| h.phy_addr)
    }

    pub fn key(&self) -> i32 {
        self.handle_field(|h| h.key)
    }

    /// Copies `bytes` into the mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::NullPtr`] if the buffer is not mapped,
    /// [`SurfaceError::OutOfRange`] if the write does not fit.
    pub fn write_pixels(&self, offset: usize, bytes: &[u8]) -> SurfaceResult<()> {
        let mapping = self.mapping().ok_or(SurfaceError::NullPtr)?;
        let mut memory = mapping.lock();
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= memory.len())
            .ok_or_else(|| {
                SurfaceError::OutOfRange(format!(
                    "write of {} bytes at {} exceeds buffer size {}",
                    bytes.len(),
                    offset,
                    memory.len()
                ))
            })?;
        memory[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Returns a copy of the mapped memory.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::NullPtr`] if the buffer is not mapped.
    pub fn read_pixels(&self) -> SurfaceResult<Vec<u8>> {
        let mapping = self.mapping().ok_or(SurfaceError::NullPtr)?;
        let memory = mapping.lock();
        Ok(memory.clone())
    }

    pub fn extra_data(&self) -> BufferExtraData {
        self.extra_data.read().clone()
    }

    pub fn set_extra_data(&self, data: BufferExtraData) {
        *self.extra_data.write() = data;
    }

    fn set_user_value(&self, key: u32, value: UserValue) -> SurfaceResult<()> {
        let mut user_data = self.user_data.write();
        if !user_data.contains_key(&key) && user_data.len() >= SURFACE_MAX_USER_DATA_COUNT {
            tracing::warn!(sequence = self.sequence, "buffer has too many user data entries");
            return Err(SurfaceError::OutOfRange(format!(
                "at most {} user data entries per buffer",
                SURFACE_MAX_USER_DATA_COUNT
            )));
        }
        user_data.insert(key, value);
        Ok(())
    }

    fn user_value(&self, key: u32) -> SurfaceResult<UserValue> {
        self.user_data
            .read()
            .get(&key)
            .copied()
            .ok_or_else(|| SurfaceError::NoEntry(format!("user data key {}", key)))
    }

    pub fn set_int32(&self, key: u32, value: i32) -> SurfaceResult<()> {
        self.set_user_value(key, UserValue::Int32(value))
    }

    /// # Errors
    ///
    /// [`SurfaceError::NoEntry`] for an unknown key, [`SurfaceError::TypeError`]
    /// if the key holds an `i64`.
    pub fn get_int32(&self, key: u32) -> SurfaceResult<i32> {
        match self.user_value(key)? {
            UserValue::Int32(v) => Ok(v),
            UserValue::Int64(_) => Err(SurfaceError::TypeError(key.to_string())),
        }
    }

    pub fn set_int64(&self, key: u32, value: i64) -> SurfaceResult<()> {
        self.set_user_value(key, UserValue::Int64(value))
    }

    /// # Errors
    ///
    /// [`SurfaceError::NoEntry`] for an unknown key, [`SurfaceError::TypeError`]
    /// if the key holds an `i32`.
    pub fn get_int64(&self, key: u32) -> SurfaceResult<i64> {
        match self.user_value(key)? {
            UserValue::Int64(v) => Ok(v),
            UserValue::Int32(_) => Err(SurfaceError::TypeError(key.to_string())),
        }
    }
}

impl fmt::Debug for SurfaceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = self.storage.read();
        f.debug_struct("SurfaceBuffer")
            .field("sequence", &self.sequence)
            .field("handle", &storage.handle)
            .field("mapped", &storage.mapping.is_some())
            .finish()
    }
}
