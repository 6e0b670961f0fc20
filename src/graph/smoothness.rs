//! Pairwise costs between 4-neighbours.
//!
//! Only the right and down links are computed; the oracle's left and up
//! planes are the same values shifted by one pixel.

use image::{imageops, Luma};
use imageproc::edges::canny;

use crate::color::{cone_feature, CostImage};
use crate::config::GraphConfig;
use crate::error::Result;
use crate::frame::{ensure_non_empty, ColorFrame};

/// Right and down link costs of every pixel. The right cost of the last
/// column and the down cost of the last row are 0.
#[derive(Debug, Clone)]
pub struct SmoothnessCosts {
    pub right: CostImage,
    pub down: CostImage,
}

impl SmoothnessCosts {
    pub fn dimensions(&self) -> (u32, u32) {
        self.right.dimensions()
    }
}

pub struct SmoothnessModel {
    max_smooth_cost: u16,
    sigma: f32,
    edge_bonus: u16,
    canny_low: f32,
    canny_high: f32,
}

impl SmoothnessModel {
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            max_smooth_cost: config.max_smooth_cost,
            sigma: config.sigma,
            edge_bonus: config.edge_bonus,
            canny_low: config.canny_low,
            canny_high: config.canny_high,
        }
    }

    pub fn set_max_smooth_cost(&mut self, cost: u16) {
        if cost > 0 {
            self.max_smooth_cost = cost;
        }
    }

    /// `exp(-|P - Q|^2 / (2 sigma^2)) * max_smooth_cost` over HSV cone
    /// points, plus the edge bonus when both pixels lie on a Canny edge.
    #[inline]
    fn link(&self, p: [f32; 3], q: [f32; 3], both_on_edge: bool) -> u16 {
        let distance: f32 = p.iter().zip(&q).map(|(a, b)| (a - b) * (a - b)).sum();
        let similarity = (-distance / (2.0 * self.sigma * self.sigma)).exp();
        let cost = (similarity * self.max_smooth_cost as f32) as u16;
        if both_on_edge {
            cost.saturating_add(self.edge_bonus)
        } else {
            cost
        }
    }

    pub fn compute(&self, frame: &ColorFrame) -> Result<SmoothnessCosts> {
        let _span = tracing::debug_span!("smoothness").entered();
        ensure_non_empty("color frame", frame.dimensions())?;

        let (width, height) = frame.dimensions();
        let gray = imageops::grayscale(frame);
        let edges = canny(&gray, self.canny_low, self.canny_high);
        let on_edge = |x: u32, y: u32| edges.get_pixel(x, y)[0] != 0;

        let cone: Vec<[f32; 3]> = frame.pixels().map(|&p| cone_feature(p)).collect();
        let at = |x: u32, y: u32| cone[(y * width + x) as usize];

        let right = CostImage::from_fn(width, height, |x, y| {
            Luma([if x + 1 >= width {
                0
            } else {
                self.link(at(x, y), at(x + 1, y), on_edge(x, y) && on_edge(x + 1, y))
            }])
        });
        let down = CostImage::from_fn(width, height, |x, y| {
            Luma([if y + 1 >= height {
                0
            } else {
                self.link(at(x, y), at(x, y + 1), on_edge(x, y) && on_edge(x, y + 1))
            }])
        });

        Ok(SmoothnessCosts { right, down })
    }
}
