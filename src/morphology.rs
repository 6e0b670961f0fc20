//! Disk-shaped morphology and the handful of mask operations the stages
//! combine regions with.

use image::Luma;
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask as StructuringElement};

use crate::frame::{Mask, MASK_OFF, MASK_ON};

/// Disk structuring element of the given radius (2r+1 across).
pub fn disk(radius: u32) -> StructuringElement {
    StructuringElement::disk(radius.min(u8::MAX as u32) as u8)
}

pub fn dilate(mask: &Mask, element: &StructuringElement) -> Mask {
    grayscale_dilate(mask, element)
}

pub fn erode(mask: &Mask, element: &StructuringElement) -> Mask {
    grayscale_erode(mask, element)
}

fn combine(a: &Mask, b: &Mask, f: impl Fn(bool, bool) -> bool) -> Mask {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let mut out = Mask::new(a.width(), a.height());
    for ((o, pa), pb) in out.pixels_mut().zip(a.pixels()).zip(b.pixels()) {
        *o = Luma([if f(pa[0] != 0, pb[0] != 0) { MASK_ON } else { MASK_OFF }]);
    }
    out
}

pub fn union(a: &Mask, b: &Mask) -> Mask {
    combine(a, b, |x, y| x || y)
}

pub fn intersect(a: &Mask, b: &Mask) -> Mask {
    combine(a, b, |x, y| x && y)
}

/// Pixels set in `a` and not in `b`
pub fn difference(a: &Mask, b: &Mask) -> Mask {
    combine(a, b, |x, y| x && !y)
}

pub fn complement(mask: &Mask) -> Mask {
    let mut out = mask.clone();
    for p in out.pixels_mut() {
        p[0] = if p[0] != 0 { MASK_OFF } else { MASK_ON };
    }
    out
}

pub fn count(mask: &Mask) -> usize {
    mask.pixels().filter(|p| p[0] != 0).count()
}
