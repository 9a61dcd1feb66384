//! Geometric primitives.
//!
//! Buffers describe their dirty region with an integer [`Rect`]. Width and
//! height are signed on purpose: a producer can hand over any value and the
//! queue rejects negative extents instead of the type silently wrapping them.

use std::fmt;

/// An integer rectangle with an origin and a signed extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width; negative values are representable but invalid.
    pub w: i32,
    /// Height; negative values are representable but invalid.
    pub h: i32,
}

impl Rect {
    /// Creates a new `Rect`.
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Creates a rectangle anchored at the origin covering `w` x `h`.
    pub const fn from_size(w: i32, h: i32) -> Self {
        Self { x: 0, y: 0, w, h }
    }

    /// Returns `true` if neither extent is negative.
    pub fn has_valid_extent(&self) -> bool {
        self.w >= 0 && self.h >= 0
    }

    /// Returns `true` if the rectangle covers no area.
    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// Exclusive right edge, saturating on overflow.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.w)
    }

    /// Exclusive bottom edge, saturating on overflow.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.h)
    }

    /// Area in pixels; zero for empty rectangles.
    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            i64::from(self.w) * i64::from(self.h)
        }
    }

    /// Computes the overlap of two rectangles, `None` if they do not overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > left && bottom > top {
            Some(Rect::new(left, top, right - left, bottom - top))
        } else {
            None
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.w, self.h)
    }
}
