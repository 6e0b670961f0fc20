//! Builds the min-cut problem of one region and keeps the label buffer the
//! oracle's answers are written into.

use std::sync::atomic::{AtomicU64, Ordering};

use image::Luma;

use super::smoothness::{SmoothnessCosts, SmoothnessModel};
use super::solver::{GraphCutProblem, MinCutSolver, SolverStatus};
use crate::color::CostImage;
use crate::config::GraphConfig;
use crate::error::{Result, SegmentError};
use crate::frame::{ensure_dimensions, BoundingBox, ColorFrame, Mask, MASK_OFF, MASK_ON};

/// Cost marking a label as forbidden
pub const HARD_COST: u16 = u16::MAX;

/// Data and smoothness costs of a whole frame.
#[derive(Debug, Clone)]
pub struct CostMaps {
    /// Cost of labelling each pixel foreground
    pub foreground: CostImage,
    /// Cost of labelling each pixel background
    pub background: CostImage,
    pub smoothness: SmoothnessCosts,
}

impl CostMaps {
    pub fn dimensions(&self) -> (u32, u32) {
        self.foreground.dimensions()
    }

    /// Signed terminal cost, positive when foreground is cheaper.
    #[inline]
    pub fn terminal(&self, x: u32, y: u32) -> i32 {
        self.background.get_pixel(x, y)[0] as i32 - self.foreground.get_pixel(x, y)[0] as i32
    }
}

/// Combines the two models' costs with the seed's certain regions. Hard
/// foreground forbids background and hard background forbids foreground;
/// hard foreground wins where both are set.
pub fn combine_data_costs(
    foreground_costs: &CostImage,
    background_costs: &CostImage,
    hard_foreground: &Mask,
    hard_background: &Mask,
) -> Result<(CostImage, CostImage)> {
    let dims = foreground_costs.dimensions();
    ensure_dimensions("background costs", dims, background_costs.dimensions())?;
    ensure_dimensions("hard foreground", dims, hard_foreground.dimensions())?;
    ensure_dimensions("hard background", dims, hard_background.dimensions())?;

    let mut foreground = CostImage::new(dims.0, dims.1);
    let mut background = CostImage::new(dims.0, dims.1);
    for ((((fg, bg), (&fg_cost, &bg_cost)), hard_fg), hard_bg) in foreground
        .pixels_mut()
        .zip(background.pixels_mut())
        .zip(foreground_costs.as_raw().iter().zip(background_costs.as_raw()))
        .zip(hard_foreground.pixels())
        .zip(hard_background.pixels())
    {
        let (f, b) = if hard_fg[0] != 0 {
            (0, HARD_COST)
        } else if hard_bg[0] != 0 {
            (HARD_COST, 0)
        } else {
            (fg_cost, bg_cost)
        };
        *fg = Luma([f]);
        *bg = Luma([b]);
    }
    Ok((foreground, background))
}

pub struct CostAssembler {
    terminal_bias: i32,
    smoothness: SmoothnessModel,
    costs: Option<CostMaps>,
    limits: BoundingBox,
    labels: Mask,
    input_version: AtomicU64,
    label_version: AtomicU64,
}

impl CostAssembler {
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            terminal_bias: config.terminal_bias,
            smoothness: SmoothnessModel::new(config),
            costs: None,
            limits: BoundingBox::full(0, 0),
            labels: Mask::new(0, 0),
            input_version: AtomicU64::new(0),
            label_version: AtomicU64::new(0),
        }
    }

    pub fn set_max_smooth_cost(&mut self, cost: u16) {
        self.smoothness.set_max_smooth_cost(cost);
    }

    /// Replaces the cost maps and the region to segment. Limits that do
    /// not fit the frame fall back to the whole frame. Returns the new
    /// input version.
    pub fn set_costs(
        &mut self,
        frame: &ColorFrame,
        foreground_costs: &CostImage,
        background_costs: &CostImage,
        hard_foreground: &Mask,
        hard_background: &Mask,
        limits: BoundingBox,
    ) -> Result<u64> {
        let (width, height) = frame.dimensions();
        ensure_dimensions("foreground costs", (width, height), foreground_costs.dimensions())?;
        let (foreground, background) =
            combine_data_costs(foreground_costs, background_costs, hard_foreground, hard_background)?;
        let smoothness = self.smoothness.compute(frame)?;

        self.limits = if limits.fits(width, height) {
            limits
        } else {
            tracing::warn!("Limits {:?} outside {}x{} frame, using the whole frame", limits, width, height);
            BoundingBox::full(width, height)
        };
        if self.labels.dimensions() != (width, height) {
            self.labels = Mask::new(width, height);
        }
        self.costs = Some(CostMaps {
            foreground,
            background,
            smoothness,
        });

        Ok(self.input_version.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn costs(&self) -> Option<&CostMaps> {
        self.costs.as_ref()
    }

    pub fn limits(&self) -> BoundingBox {
        self.limits
    }

    /// Slices the limited region out of the cost maps in the oracle's
    /// format. Link costs leaving the region are cut.
    pub fn problem(&self) -> Result<GraphCutProblem> {
        let costs = self
            .costs
            .as_ref()
            .ok_or(SegmentError::UninitializedModel("cost maps"))?;
        let BoundingBox {
            x_min,
            x_max,
            y_min,
            y_max,
        } = self.limits;
        let (width, height) = (self.limits.width(), self.limits.height());
        let n = width as usize * height as usize;

        let mut problem = GraphCutProblem {
            width,
            height,
            bias: self.terminal_bias,
            terminals: Vec::with_capacity(n),
            left: Vec::with_capacity(n),
            right: Vec::with_capacity(n),
            up: Vec::with_capacity(n),
            down: Vec::with_capacity(n),
        };

        let right = &costs.smoothness.right;
        let down = &costs.smoothness.down;
        for y in y_min..=y_max {
            for x in x_min..=x_max {
                problem.terminals.push(costs.terminal(x, y) + self.terminal_bias);
                problem
                    .right
                    .push(if x < x_max { right.get_pixel(x, y)[0] as i32 } else { 0 });
                problem
                    .down
                    .push(if y < y_max { down.get_pixel(x, y)[0] as i32 } else { 0 });
                problem
                    .left
                    .push(if x > x_min { right.get_pixel(x - 1, y)[0] as i32 } else { 0 });
                problem
                    .up
                    .push(if y > y_min { down.get_pixel(x, y - 1)[0] as i32 } else { 0 });
            }
        }
        Ok(problem)
    }

    /// Runs the oracle on the current region. On success every pixel
    /// outside the region is reset to background and the region takes the
    /// oracle's labels; on failure the previous labels stay.
    pub fn segment(&mut self, solver: &mut dyn MinCutSolver) -> Result<SolverStatus> {
        let problem = self.problem()?;
        let solution = solver.solve(&problem)?;
        if solution.labels.len() != problem.len() {
            return Err(SegmentError::Oracle(format!(
                "expected {} labels, got {}",
                problem.len(),
                solution.labels.len()
            )));
        }
        if let SolverStatus::Warning(message) = &solution.status {
            tracing::warn!("Min-cut oracle warning: {}", message);
        }

        let limits = self.limits;
        let region_width = limits.width() as usize;
        for (x, y, pixel) in self.labels.enumerate_pixels_mut() {
            let value = if limits.contains(x, y) {
                let index = (y - limits.y_min) as usize * region_width + (x - limits.x_min) as usize;
                if solution.labels[index] {
                    MASK_ON
                } else {
                    MASK_OFF
                }
            } else {
                MASK_OFF
            };
            *pixel = Luma([value]);
        }
        self.label_version.fetch_add(1, Ordering::AcqRel);

        Ok(solution.status)
    }

    /// Publishes an all-background labelling of a `width` x `height` frame.
    pub fn clear_labels(&mut self, width: u32, height: u32) {
        self.labels = Mask::new(width, height);
        self.label_version.fetch_add(1, Ordering::AcqRel);
    }

    /// 255 = foreground, 0 = background
    pub fn labels(&self) -> &Mask {
        &self.labels
    }

    pub fn input_version(&self) -> u64 {
        self.input_version.load(Ordering::Acquire)
    }

    pub fn label_version(&self) -> u64 {
        self.label_version.load(Ordering::Acquire)
    }

    /// The labels, if they changed since `version` was observed.
    pub fn labels_since(&self, version: u64) -> Option<(u64, &Mask)> {
        let current = self.label_version();
        (current != version).then_some((current, &self.labels))
    }
}
