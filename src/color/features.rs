//! Color spaces used by the appearance models and the smoothness term.

use image::Rgb;

use crate::frame::ColorFrame;

/// HSV with hue in degrees [0, 360), saturation and value in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

#[inline]
pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> Hsv {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { delta / max } else { 0.0 };
    if delta <= 0.0 {
        return Hsv { h: 0.0, s, v: max };
    }

    let h = if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta) + 120.0
    } else {
        60.0 * ((r - g) / delta) + 240.0
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    Hsv {
        h: if h >= 360.0 { h - 360.0 } else { h },
        s,
        v: max,
    }
}

/// Appearance feature: hue in degrees and saturation in percent.
#[inline]
pub fn appearance_feature(pixel: Rgb<u8>) -> [f32; 2] {
    let hsv = rgb_to_hsv(pixel);
    [hsv.h, hsv.s * 100.0]
}

/// Smoothness feature: the HSV cone point (s cos h, s sin h, v), so hue
/// distance shrinks with saturation and wraps at 360 degrees.
#[inline]
pub fn cone_feature(pixel: Rgb<u8>) -> [f32; 3] {
    let hsv = rgb_to_hsv(pixel);
    let angle = hsv.h.to_radians();
    [hsv.s * angle.cos(), hsv.s * angle.sin(), hsv.v]
}

/// Appearance features of a whole frame, computed once and shared by the
/// foreground and background models.
#[derive(Debug, Clone)]
pub struct FeatureImage {
    width: u32,
    height: u32,
    features: Vec<[f32; 2]>,
}

impl FeatureImage {
    pub fn from_frame(frame: &ColorFrame) -> Self {
        let _span = tracing::debug_span!("features").entered();
        let (width, height) = frame.dimensions();
        Self {
            width,
            height,
            features: frame.pixels().map(|&p| appearance_feature(p)).collect(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn features(&self) -> &[[f32; 2]] {
        &self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn primary_hues() {
        let red = rgb_to_hsv(Rgb([255, 0, 0]));
        assert!(close(red.h, 0.0) && close(red.s, 1.0) && close(red.v, 1.0));
        assert!(close(rgb_to_hsv(Rgb([0, 255, 0])).h, 120.0));
        assert!(close(rgb_to_hsv(Rgb([0, 0, 255])).h, 240.0));
        assert!(close(rgb_to_hsv(Rgb([255, 0, 255])).h, 300.0));
    }

    #[test]
    fn grays_are_unsaturated() {
        let gray = rgb_to_hsv(Rgb([128, 128, 128]));
        assert_eq!(gray.h, 0.0);
        assert_eq!(gray.s, 0.0);
        assert!(close(gray.v, 128.0 / 255.0));
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 0])).s, 0.0);
    }

    #[test]
    fn appearance_ranges() {
        let [h, s] = appearance_feature(Rgb([255, 128, 0]));
        assert!((0.0..360.0).contains(&h));
        assert!(close(s, 100.0));
        let [_, s] = appearance_feature(Rgb([200, 200, 200]));
        assert_eq!(s, 0.0);
    }

    #[test]
    fn cone_wraps_hue() {
        let a = cone_feature(Rgb([255, 0, 3]));
        let b = cone_feature(Rgb([255, 3, 0]));
        let dist: f32 = a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum();
        assert!(dist < 1e-3, "hues either side of 0 should be close, got {dist}");
    }
}
