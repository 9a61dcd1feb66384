//! Request and flush parameters exchanged between producer and queue.

use crate::error::{SurfaceError, SurfaceResult};
use bitflags::bitflags;
use surface_core::limits::{
    SURFACE_MAX_HEIGHT, SURFACE_MAX_STRIDE_ALIGNMENT, SURFACE_MAX_WIDTH, SURFACE_MIN_STRIDE_ALIGNMENT,
};
use surface_core::types::Rect;

/// Pixel layout of a buffer, using the display HDI numbering.
///
/// The queue only range-checks the value; [`PixelFormat::bytes_per_pixel`]
/// is used by allocators that lay out memory themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixelFormat(pub i32);

impl PixelFormat {
    pub const CLUT8: PixelFormat = PixelFormat(0);
    pub const RGB_565: PixelFormat = PixelFormat(3);
    pub const RGBA_5658: PixelFormat = PixelFormat(4);
    pub const RGBX_4444: PixelFormat = PixelFormat(5);
    pub const RGBA_4444: PixelFormat = PixelFormat(6);
    pub const RGB_444: PixelFormat = PixelFormat(7);
    pub const RGBX_5551: PixelFormat = PixelFormat(8);
    pub const RGBA_5551: PixelFormat = PixelFormat(9);
    pub const RGB_555: PixelFormat = PixelFormat(10);
    pub const RGBX_8888: PixelFormat = PixelFormat(11);
    pub const RGBA_8888: PixelFormat = PixelFormat(12);
    pub const RGB_888: PixelFormat = PixelFormat(13);
    pub const BGR_565: PixelFormat = PixelFormat(14);
    pub const BGRX_4444: PixelFormat = PixelFormat(15);
    pub const BGRA_4444: PixelFormat = PixelFormat(16);
    pub const BGRX_5551: PixelFormat = PixelFormat(17);
    pub const BGRA_5551: PixelFormat = PixelFormat(18);
    pub const BGRX_8888: PixelFormat = PixelFormat(19);
    pub const BGRA_8888: PixelFormat = PixelFormat(20);
    pub const YUV_422_I: PixelFormat = PixelFormat(21);
    pub const YCBCR_422_SP: PixelFormat = PixelFormat(22);
    pub const YCRCB_422_SP: PixelFormat = PixelFormat(23);
    pub const YCBCR_420_SP: PixelFormat = PixelFormat(24);
    pub const YCRCB_420_SP: PixelFormat = PixelFormat(25);
    pub const YCBCR_422_P: PixelFormat = PixelFormat(26);
    pub const YCRCB_422_P: PixelFormat = PixelFormat(27);
    pub const YCBCR_420_P: PixelFormat = PixelFormat(28);
    pub const YCRCB_420_P: PixelFormat = PixelFormat(29);
    /// Upper bound of the numbering; itself an accepted value.
    pub const BUTT: PixelFormat = PixelFormat(i32::MAX);

    /// Returns `true` for values in `[0, BUTT]`.
    pub fn is_valid(self) -> bool {
        self.0 >= 0 && self.0 <= Self::BUTT.0
    }

    /// Bytes occupied by one pixel of the first plane.
    ///
    /// Packed 16-bit layouts report 2, 24-bit 3, 32-bit 4. Planar and
    /// semi-planar YUV formats report 1 (the luma plane); their chroma planes
    /// are accounted for by [`PixelFormat::plane_height_factor`].
    pub fn bytes_per_pixel(self) -> u32 {
        match self.0 {
            0 => 1,
            3..=10 | 14..=18 | 21 => 2,
            13 => 3,
            11 | 12 | 19 | 20 => 4,
            _ => 1,
        }
    }

    /// Total rows, in units of half a luma row, per luma row pair.
    ///
    /// 4:2:0 layouts need 3 half-rows per row (1.5x), 4:2:2 planar layouts
    /// need 4 (2x); everything else needs 2 (1x).
    pub fn plane_height_factor(self) -> u32 {
        match self.0 {
            24 | 25 | 28 | 29 => 3,
            22 | 23 | 26 | 27 => 4,
            _ => 2,
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        PixelFormat::RGBA_8888
    }
}

bitflags! {
    /// How a buffer will be used; passed through to the allocator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u64 {
        const CPU_READ = 1 << 0;
        const CPU_WRITE = 1 << 1;
        /// Media memory zone.
        const MEM_MMZ = 1 << 2;
        const MEM_DMA = 1 << 3;
        const MEM_SHARE = 1 << 4;
        /// Cached media memory zone.
        const MEM_MMZ_CACHE = 1 << 5;
        /// Framebuffer memory.
        const MEM_FB = 1 << 6;
        const ASSIGN_SIZE = 1 << 7;
        const HW_RENDER = 1 << 8;
        const HW_TEXTURE = 1 << 9;
        const HW_COMPOSER = 1 << 10;
        const PROTECTED = 1 << 11;
        const CAMERA_READ = 1 << 12;
        const CAMERA_WRITE = 1 << 13;
        const VIDEO_ENCODER = 1 << 14;
        const VIDEO_DECODER = 1 << 15;
    }
}

/// What a producer asks the queue for.
///
/// Two configs are equal only if every field matches, `timeout` included;
/// a free buffer is reused as-is only for an equal config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRequestConfig {
    pub width: i32,
    pub height: i32,
    /// Row alignment in bytes; a power of two in `[4, 32]`.
    pub stride_alignment: i32,
    pub format: PixelFormat,
    pub usage: BufferUsage,
    /// Stored but not interpreted by the queue.
    pub timeout: i32,
}

impl Default for BufferRequestConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            stride_alignment: 8,
            format: PixelFormat::RGBA_8888,
            usage: BufferUsage::CPU_READ | BufferUsage::CPU_WRITE | BufferUsage::MEM_DMA,
            timeout: 0,
        }
    }
}

impl BufferRequestConfig {
    /// A default config with the given dimensions.
    pub fn with_size(width: i32, height: i32) -> Self {
        Self { width, height, ..Self::default() }
    }

    /// Checks geometry, alignment and format.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::InvalidParam`] naming the first offending field.
    pub fn validate(&self) -> SurfaceResult<()> {
        if self.width <= 0 || self.width > SURFACE_MAX_WIDTH {
            return Err(SurfaceError::InvalidParam(format!(
                "config.width (0, {}], now is {}",
                SURFACE_MAX_WIDTH, self.width
            )));
        }
        if self.height <= 0 || self.height > SURFACE_MAX_HEIGHT {
            return Err(SurfaceError::InvalidParam(format!(
                "config.height (0, {}], now is {}",
                SURFACE_MAX_HEIGHT, self.height
            )));
        }
        let align = self.stride_alignment;
        if !(SURFACE_MIN_STRIDE_ALIGNMENT..=SURFACE_MAX_STRIDE_ALIGNMENT).contains(&align) {
            return Err(SurfaceError::InvalidParam(format!(
                "config.stride_alignment [{}, {}], now is {}",
                SURFACE_MIN_STRIDE_ALIGNMENT, SURFACE_MAX_STRIDE_ALIGNMENT, align
            )));
        }
        if align & (align - 1) != 0 {
            return Err(SurfaceError::InvalidParam(format!(
                "config.stride_alignment must be a power of two, now is {}",
                align
            )));
        }
        if !self.format.is_valid() {
            return Err(SurfaceError::InvalidParam(format!(
                "config.format [0, {}], now is {}",
                PixelFormat::BUTT.0,
                self.format.0
            )));
        }
        Ok(())
    }
}

/// What a producer reports when handing a filled buffer to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferFlushConfig {
    /// Region written since the previous flush.
    pub damage: Rect,
    /// Capture time in microseconds; 0 means "now".
    pub timestamp: i64,
}

impl BufferFlushConfig {
    /// # Errors
    ///
    /// [`SurfaceError::InvalidParam`] if the damage has a negative extent.
    pub fn validate(&self) -> SurfaceResult<()> {
        if self.damage.w < 0 {
            return Err(SurfaceError::InvalidParam(format!(
                "config.damage.w >= 0, now is {}",
                self.damage.w
            )));
        }
        if self.damage.h < 0 {
            return Err(SurfaceError::InvalidParam(format!(
                "config.damage.h >= 0, now is {}",
                self.damage.h
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn valid() -> BufferRequestConfig {
        BufferRequestConfig::with_size(1920, 1080)
    }

    #[test]
    fn test_default_config_with_size_is_valid() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[rstest]
    #[case::zero_width(BufferRequestConfig { width: 0, ..valid() })]
    #[case::negative_width(BufferRequestConfig { width: -1, ..valid() })]
    #[case::wide(BufferRequestConfig { width: SURFACE_MAX_WIDTH + 1, ..valid() })]
    #[case::zero_height(BufferRequestConfig { height: 0, ..valid() })]
    #[case::tall(BufferRequestConfig { height: SURFACE_MAX_HEIGHT + 1, ..valid() })]
    #[case::align_small(BufferRequestConfig { stride_alignment: 2, ..valid() })]
    #[case::align_large(BufferRequestConfig { stride_alignment: 64, ..valid() })]
    #[case::align_not_pow2(BufferRequestConfig { stride_alignment: 12, ..valid() })]
    #[case::negative_format(BufferRequestConfig { format: PixelFormat(-1), ..valid() })]
    fn test_invalid_request_configs(#[case] config: BufferRequestConfig) {
        assert!(matches!(config.validate(), Err(SurfaceError::InvalidParam(_))));
    }

    #[rstest]
    #[case(4)]
    #[case(8)]
    #[case(16)]
    #[case(32)]
    fn test_valid_alignments(#[case] stride_alignment: i32) {
        let config = BufferRequestConfig { stride_alignment, ..valid() };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_boundary_dimensions_and_format() {
        let config = BufferRequestConfig {
            width: SURFACE_MAX_WIDTH,
            height: SURFACE_MAX_HEIGHT,
            format: PixelFormat::BUTT,
            ..valid()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_config_equality_includes_timeout() {
        let a = valid();
        let b = BufferRequestConfig { timeout: 16, ..valid() };
        assert_ne!(a, b);
    }

    #[rstest]
    #[case(Rect::new(0, 0, -1, 10))]
    #[case(Rect::new(0, 0, 10, -1))]
    fn test_flush_config_rejects_negative_damage(#[case] damage: Rect) {
        let flush = BufferFlushConfig { damage, timestamp: 0 };
        assert!(matches!(flush.validate(), Err(SurfaceError::InvalidParam(_))));
    }

    #[test]
    fn test_flush_config_accepts_empty_damage() {
        assert_eq!(BufferFlushConfig::default().validate(), Ok(()));
    }

    #[rstest]
    #[case(PixelFormat::RGBA_8888, 4)]
    #[case(PixelFormat::RGB_888, 3)]
    #[case(PixelFormat::RGB_565, 2)]
    #[case(PixelFormat::YCBCR_420_SP, 1)]
    fn test_bytes_per_pixel(#[case] format: PixelFormat, #[case] expected: u32) {
        assert_eq!(format.bytes_per_pixel(), expected);
    }

    #[test]
    fn test_usage_bits_round_trip_through_u64() {
        let usage = BufferUsage::CPU_READ | BufferUsage::HW_RENDER;
        assert_eq!(BufferUsage::from_bits_retain(usage.bits()), usage);
        assert_eq!(usage.bits(), 0x101);
    }
}
