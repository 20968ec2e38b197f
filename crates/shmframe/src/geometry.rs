//! Frame sizes and rectangles.
//!
//! Frames are 4-byte-per-pixel packed color, row-major. Sizes arrive from the
//! compositor as signed integers and are validated here before any byte count
//! is derived from them.

/// Bytes per pixel of every frame crossing the channel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelSize {
    pub width: i32,
    pub height: i32,
}

impl PixelSize {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Whether either side is zero or negative.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Bytes in one packed row, or `None` for nonsensical sizes.
    pub fn row_bytes(&self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let width = usize::try_from(self.width).ok()?;
        width.checked_mul(BYTES_PER_PIXEL)
    }

    /// Bytes in a packed frame of this size.
    ///
    /// `None` if a side is zero or negative, or the product overflows.
    pub fn byte_size(&self) -> Option<usize> {
        let height = usize::try_from(self.height).ok()?;
        self.row_bytes()?.checked_mul(height)
    }

    /// Whether both sides are within `tolerance` pixels of `other`.
    pub fn within(&self, other: PixelSize, tolerance: i32) -> bool {
        let dw = (i64::from(self.width) - i64::from(other.width)).abs();
        let dh = (i64::from(self.height) - i64::from(other.height)).abs();
        dw <= i64::from(tolerance) && dh <= i64::from(tolerance)
    }
}

/// An axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle at the origin covering `size`.
    pub const fn from_size(size: PixelSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    #[inline]
    pub fn size(&self) -> PixelSize {
        PixelSize::new(self.width, self.height)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }
}
