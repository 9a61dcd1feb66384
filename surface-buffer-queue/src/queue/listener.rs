//! Notification hooks between the queue and its two sides.
//!
//! Both hooks are invoked after the queue's lock has been dropped, so a
//! callback may call straight back into the queue.

use crate::buffer::SurfaceBuffer;
use crate::error::SurfaceResult;
use std::sync::Arc;

/// Consumer-side notification that a flushed buffer is ready to acquire.
pub trait ConsumerListener: Send + Sync {
    fn on_buffer_available(&self);
}

impl<F> ConsumerListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_buffer_available(&self) {
        self()
    }
}

/// Producer-side hook run on every release.
///
/// Returning `Ok` means the hook took over the buffer; the queue then leaves
/// the slot's state untouched.
pub type ReleaseCallback = Arc<dyn Fn(&Arc<SurfaceBuffer>) -> SurfaceResult<()> + Send + Sync>;
