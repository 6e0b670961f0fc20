use image::{GrayImage, ImageBuffer, Luma, RgbImage};

use crate::error::{Result, SegmentError};

/// Raw depth samples, one `u16` per pixel
pub type DepthFrame = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Color samples aligned 1:1 with the depth frame
pub type ColorFrame = RgbImage;

/// Binary mask: 0 = outside, 255 = inside
pub type Mask = GrayImage;

/// Depth value the sensor reports for a pixel it could not reconstruct
pub const INVALID_DEPTH: u16 = u16::MAX;

pub const MASK_ON: u8 = 255;
pub const MASK_OFF: u8 = 0;

/// Three-way partition of a frame produced by depth background subtraction.
///
/// `background` and `foreground` never overlap and `unknown` is the
/// complement of their union.
#[derive(Debug, Clone)]
pub struct Trimap {
    pub background: Mask,
    pub foreground: Mask,
    pub unknown: Mask,
}

impl Trimap {
    pub fn dimensions(&self) -> (u32, u32) {
        self.foreground.dimensions()
    }

    pub fn check(&self) -> Result<()> {
        let dims = self.foreground.dimensions();
        ensure_dimensions("trimap background", dims, self.background.dimensions())?;
        ensure_dimensions("trimap unknown", dims, self.unknown.dimensions())
    }
}

/// Inclusive axis-aligned pixel bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl BoundingBox {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x_min: 0,
            x_max: width.saturating_sub(1),
            y_min: 0,
            y_max: height.saturating_sub(1),
        }
    }

    pub fn width(&self) -> u32 {
        self.x_max - self.x_min + 1
    }

    pub fn height(&self) -> u32 {
        self.y_max - self.y_min + 1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Grows the box by `margin` on every side, clamped to the frame.
    pub fn expand(&self, margin: u32, width: u32, height: u32) -> Self {
        Self {
            x_min: self.x_min.saturating_sub(margin),
            x_max: self.x_max.saturating_add(margin).min(width.saturating_sub(1)),
            y_min: self.y_min.saturating_sub(margin),
            y_max: self.y_max.saturating_add(margin).min(height.saturating_sub(1)),
        }
    }

    /// True when the box is non-empty and lies inside a `width` x `height` frame.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.x_min <= self.x_max && self.y_min <= self.y_max && self.x_max < width && self.y_max < height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    pub fn union(&self, other: &BoundingBox) -> Self {
        Self {
            x_min: self.x_min.min(other.x_min),
            x_max: self.x_max.max(other.x_max),
            y_min: self.y_min.min(other.y_min),
            y_max: self.y_max.max(other.y_max),
        }
    }
}

pub fn ensure_dimensions(what: &'static str, expected: (u32, u32), actual: (u32, u32)) -> Result<()> {
    if expected != actual {
        return Err(SegmentError::shape(what, expected, actual));
    }
    Ok(())
}

pub fn ensure_non_empty(what: &'static str, dims: (u32, u32)) -> Result<()> {
    if dims.0 == 0 || dims.1 == 0 {
        return Err(SegmentError::shape(what, (1, 1), dims));
    }
    Ok(())
}

/// Converts a raw Kinect 11-bit disparity sample to metres.
pub fn depth_to_meters(raw: u16) -> f32 {
    0.1236 * (raw as f32 / 2842.5 + 1.1863).tan()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_clamps_to_frame() {
        let bbox = BoundingBox {
            x_min: 2,
            x_max: 7,
            y_min: 0,
            y_max: 3,
        };
        let grown = bbox.expand(4, 10, 6);
        assert_eq!(
            grown,
            BoundingBox {
                x_min: 0,
                x_max: 9,
                y_min: 0,
                y_max: 5
            }
        );
        assert!(grown.fits(10, 6));
    }

    #[test]
    fn union_spans_both_boxes() {
        let a = BoundingBox {
            x_min: 2,
            x_max: 4,
            y_min: 5,
            y_max: 9,
        };
        let b = BoundingBox {
            x_min: 3,
            x_max: 8,
            y_min: 1,
            y_max: 6,
        };
        let u = a.union(&b);
        assert_eq!((u.x_min, u.x_max, u.y_min, u.y_max), (2, 8, 1, 9));
        assert!(u.contains(8, 9) && !u.contains(1, 1));
    }

    #[test]
    fn full_box_covers_frame() {
        let bbox = BoundingBox::full(640, 480);
        assert_eq!((bbox.width(), bbox.height()), (640, 480));
        assert_eq!(bbox.area(), 640 * 480);
        assert!(!bbox.fits(639, 480));
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let err = ensure_dimensions("mask", (4, 4), (4, 5)).unwrap_err();
        assert!(matches!(err, SegmentError::InputShapeMismatch { .. }));
        assert!(ensure_non_empty("frame", (0, 3)).is_err());
    }

    #[test]
    fn depth_conversion_is_monotonic() {
        assert!(depth_to_meters(600) < depth_to_meters(800));
        assert!((depth_to_meters(0) - 0.1236 * 1.1863f32.tan()).abs() < 1e-6);
    }
}
