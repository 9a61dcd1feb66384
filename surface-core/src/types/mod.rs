//! Shared data types.

pub mod geometry;

pub use geometry::Rect;
