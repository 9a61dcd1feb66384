//! Protocol limits shared by configuration validation and the buffer queue.

/// Largest buffer width a producer may request.
pub const SURFACE_MAX_WIDTH: i32 = 7680;
/// Largest buffer height a producer may request.
pub const SURFACE_MAX_HEIGHT: i32 = 7680;
/// Smallest accepted stride alignment, in bytes.
pub const SURFACE_MIN_STRIDE_ALIGNMENT: i32 = 4;
/// Largest accepted stride alignment, in bytes.
pub const SURFACE_MAX_STRIDE_ALIGNMENT: i32 = 32;
/// Upper bound for `SetQueueSize`.
pub const SURFACE_MAX_QUEUE_SIZE: u32 = 32;
/// Queue size used when configuration does not say otherwise.
pub const SURFACE_DEFAULT_QUEUE_SIZE: u32 = 3;
/// Maximum number of keyed user-data entries per buffer or surface.
pub const SURFACE_MAX_USER_DATA_COUNT: usize = 1000;
