//! Result codes of the buffer exchange protocol.
//!
//! Every operation reports failure through [`SurfaceError`]; success is
//! `Ok`. None of these are fatal: a producer seeing
//! [`SurfaceError::NoBuffer`] is expected to wait for a release and retry.

use thiserror::Error;

/// Errors returned by queue, buffer and surface operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    /// A request or flush configuration is malformed, or a value is outside its allowed range.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// No consumer listener is registered on the queue.
    #[error("no consumer listener registered")]
    NoConsumer,

    /// Capacity is exhausted, or there is nothing to dequeue.
    #[error("no buffer available")]
    NoBuffer,

    /// Unknown sequence, unknown key, or the slot is in the wrong state for the transition.
    #[error("no entry: {0}")]
    NoEntry(String),

    /// The operation is not legal in the queue's current mode or state.
    #[error("invalid operation: {0}")]
    InvalidOperating(String),

    /// Not enough buffers could be evicted, or a capacity limit was hit.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A buffer carries no backing handle.
    #[error("null buffer")]
    NullPtr,

    /// A keyed value exists but with another type.
    #[error("type mismatch for key '{0}'")]
    TypeError(String),

    /// The allocator cannot satisfy the requested size.
    #[error("out of memory: {0}")]
    NoMemory(String),

    /// An allocator or mapper backend call failed.
    #[error("allocator call failed: {0}")]
    ApiFailed(String),
}

/// Convenience alias used throughout the crate.
pub type SurfaceResult<T> = Result<T, SurfaceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_error_display() {
        assert_eq!(SurfaceError::NoBuffer.to_string(), "no buffer available");
        assert_eq!(
            SurfaceError::InvalidParam("width 0 out of (0, 7680]".into()).to_string(),
            "invalid parameter: width 0 out of (0, 7680]"
        );
        assert_eq!(SurfaceError::TypeError("gamma".into()).to_string(), "type mismatch for key 'gamma'");
    }

    #[test]
    fn test_surface_error_equality() {
        assert_eq!(SurfaceError::NoConsumer, SurfaceError::NoConsumer);
        assert_ne!(SurfaceError::NoEntry("1".into()), SurfaceError::NoEntry("2".into()));
    }
}
