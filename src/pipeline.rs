//! Per-frame driver: calibration bursts first, then depth trimap, seeds,
//! color models, costs and the min-cut for every frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::color::{ColorAppearanceModel, FeatureImage};
use crate::config::SegmenterConfig;
use crate::depth::BackgroundModel;
use crate::error::Result;
use crate::frame::{depth_to_meters, ensure_dimensions, ColorFrame, DepthFrame, Mask, INVALID_DEPTH};
use crate::graph::{CostAssembler, DinicSolver, MinCutSolver, SolverStatus};
use crate::morphology;
use crate::seed::{Seed, SeedExtractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accumulating static frames for the depth noise table
    CalibratingNoise,
    /// Accumulating frames of the empty scene
    CalibratingBackground,
    Active,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub classify: Duration,
    pub seeds: Duration,
    pub gmm: Duration,
    pub costs: Duration,
    pub graphcut: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.classify + self.seeds + self.gmm + self.costs + self.graphcut
    }
}

/// What one call to [`Segmenter::push_frame`] did.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame: u64,
    /// Phase the frame was consumed in
    pub phase: Phase,
    pub seeds: usize,
    /// True when the frame produced a new labelling
    pub updated: bool,
    pub foreground_pixels: u64,
    /// Pixels of the region handed to the oracle
    pub segmented_area: u64,
    /// `foreground_pixels / segmented_area`, 0 when nothing was segmented
    pub ratio: f32,
    /// Mean distance of the segmented subject in metres
    pub subject_distance: Option<f32>,
    pub label_version: u64,
    /// Oracle status when the min-cut ran
    pub solver_status: Option<SolverStatus>,
    pub timings: StageTimings,
}

impl FrameReport {
    fn idle(frame: u64, phase: Phase, label_version: u64) -> Self {
        Self {
            frame,
            phase,
            seeds: 0,
            updated: false,
            foreground_pixels: 0,
            segmented_area: 0,
            ratio: 0.0,
            subject_distance: None,
            label_version,
            solver_status: None,
            timings: StageTimings::default(),
        }
    }
}

pub struct Segmenter {
    config: SegmenterConfig,
    phase: Phase,
    frames: u64,
    background_frames: usize,
    depth: BackgroundModel,
    extractor: SeedExtractor,
    foreground_model: ColorAppearanceModel,
    background_model: ColorAppearanceModel,
    assembler: CostAssembler,
    solver: Box<dyn MinCutSolver>,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        Self::with_solver(config, Box::new(DinicSolver::new()))
    }

    pub fn with_solver(config: SegmenterConfig, solver: Box<dyn MinCutSolver>) -> Result<Self> {
        config.validate()?;

        let depth = BackgroundModel::new(&config.depth);
        let phase = if depth.noise().is_valid() {
            Phase::CalibratingBackground
        } else {
            Phase::CalibratingNoise
        };

        Ok(Self {
            phase,
            frames: 0,
            background_frames: 0,
            depth,
            extractor: SeedExtractor::new(&config.seed),
            foreground_model: ColorAppearanceModel::new(&config.gmm)?,
            background_model: ColorAppearanceModel::new(&config.gmm)?,
            assembler: CostAssembler::new(&config.graph),
            solver,
            config,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    pub fn depth_model(&self) -> &BackgroundModel {
        &self.depth
    }

    pub fn foreground_model(&self) -> &ColorAppearanceModel {
        &self.foreground_model
    }

    pub fn background_model(&self) -> &ColorAppearanceModel {
        &self.background_model
    }

    /// Latest labels, 255 = foreground
    pub fn labels(&self) -> &Mask {
        self.assembler.labels()
    }

    pub fn label_version(&self) -> u64 {
        self.assembler.label_version()
    }

    pub fn labels_since(&self, version: u64) -> Option<(u64, &Mask)> {
        self.assembler.labels_since(version)
    }

    /// Consumes one aligned depth/color pair. An error means the frame was
    /// skipped; the previous labels stay valid.
    pub fn push_frame(&mut self, depth: &DepthFrame, color: &ColorFrame) -> Result<FrameReport> {
        self.frames += 1;
        let frame = self.frames;

        match self.phase {
            Phase::CalibratingNoise => {
                self.depth.feed_noise(depth)?;
                if self.depth.noise().frames_fed() >= self.config.calibration.noise_frames {
                    self.depth.compute_noise()?;
                    self.phase = Phase::CalibratingBackground;
                }
                Ok(FrameReport::idle(frame, Phase::CalibratingNoise, self.label_version()))
            }
            Phase::CalibratingBackground => {
                self.depth.feed(depth)?;
                self.background_frames += 1;
                if self.background_frames >= self.config.calibration.background_frames {
                    self.depth.compute()?;
                    self.background_frames = 0;
                    self.phase = Phase::Active;
                }
                Ok(FrameReport::idle(frame, Phase::CalibratingBackground, self.label_version()))
            }
            Phase::Active => self.segment(frame, depth, color),
        }
    }

    fn segment(&mut self, frame: u64, depth: &DepthFrame, color: &ColorFrame) -> Result<FrameReport> {
        ensure_dimensions("color frame", depth.dimensions(), color.dimensions())?;
        let (width, height) = depth.dimensions();
        let mut timings = StageTimings::default();

        let start = Instant::now();
        let trimap = self.depth.classify(depth)?;
        timings.classify = start.elapsed();

        let start = Instant::now();
        let seeds = self.extractor.extract(&trimap)?;
        timings.seeds = start.elapsed();

        let seed_count = seeds.len();
        let seed = if self.config.seed.largest_only {
            seeds.into_iter().next()
        } else {
            Seed::merge(&seeds)
        };
        let Some(seed) = seed else {
            tracing::debug!("No subject in frame {}", frame);
            self.assembler.clear_labels(width, height);
            let mut report = FrameReport::idle(frame, Phase::Active, self.label_version());
            report.updated = true;
            report.timings = timings;
            return Ok(report);
        };

        let start = Instant::now();
        let features = Arc::new(FeatureImage::from_frame(color));
        self.foreground_model.set_features(Arc::clone(&features));
        self.background_model.set_features(features);
        let (foreground_model, background_model) = (&mut self.foreground_model, &mut self.background_model);
        let (fg_fit, bg_fit) = rayon::join(
            || foreground_model.fit(&seed.foreground).map(|_| ()),
            || background_model.fit(&seed.background).map(|_| ()),
        );
        fg_fit?;
        bg_fit?;
        timings.gmm = start.elapsed();

        let start = Instant::now();
        let foreground_costs = self.foreground_model.costs(&seed.unknown)?;
        let background_costs = self.background_model.costs(&seed.unknown)?;
        let hard_background = morphology::union(&seed.background, &seed.mask);
        self.assembler.set_costs(
            color,
            &foreground_costs,
            &background_costs,
            &seed.foreground,
            &hard_background,
            seed.bbox,
        )?;
        timings.costs = start.elapsed();

        let start = Instant::now();
        let status = self.assembler.segment(self.solver.as_mut())?;
        timings.graphcut = start.elapsed();

        let limits = self.assembler.limits();
        let foreground_pixels = morphology::count(self.assembler.labels()) as u64;
        let segmented_area = limits.area();

        Ok(FrameReport {
            frame,
            phase: Phase::Active,
            seeds: seed_count,
            updated: true,
            foreground_pixels,
            segmented_area,
            ratio: if segmented_area > 0 {
                foreground_pixels as f32 / segmented_area as f32
            } else {
                0.0
            },
            subject_distance: subject_distance(depth, &seed.foreground),
            label_version: self.label_version(),
            solver_status: Some(status),
            timings,
        })
    }
}

/// Mean valid depth under `mask`, in metres.
fn subject_distance(depth: &DepthFrame, mask: &Mask) -> Option<f32> {
    let (sum, n) = depth
        .as_raw()
        .iter()
        .zip(mask.as_raw())
        .filter(|(&d, &m)| m != 0 && d != INVALID_DEPTH)
        .fold((0u64, 0u64), |(sum, n), (&d, _)| (sum + d as u64, n + 1));
    (n > 0).then(|| depth_to_meters((sum / n) as u16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn config() -> SegmenterConfig {
        let mut config = SegmenterConfig::default();
        config.calibration.noise_frames = 3;
        config.calibration.background_frames = 2;
        config.seed.min_area = 16;
        config.seed.dilation = 3;
        config.depth.foreground_smoothing = 1;
        config.gmm.threads = 2;
        config
    }

    #[test]
    fn calibration_phases_advance() {
        let mut segmenter = Segmenter::new(config()).unwrap();
        let depth = DepthFrame::from_pixel(16, 12, Luma([900]));
        let color = ColorFrame::from_pixel(16, 12, Rgb([10, 20, 30]));

        let phases: Vec<Phase> = (0..5)
            .map(|_| segmenter.push_frame(&depth, &color).unwrap().phase)
            .collect();
        assert_eq!(
            phases,
            vec![
                Phase::CalibratingNoise,
                Phase::CalibratingNoise,
                Phase::CalibratingNoise,
                Phase::CalibratingBackground,
                Phase::CalibratingBackground
            ]
        );
        assert_eq!(segmenter.phase(), Phase::Active);
    }

    #[test]
    fn constant_std_dev_skips_noise_calibration() {
        let mut config = config();
        config.depth.constant_std_dev = Some(5.0);
        let segmenter = Segmenter::new(config).unwrap();
        assert_eq!(segmenter.phase(), Phase::CalibratingBackground);
    }

    #[test]
    fn empty_scene_publishes_background_labels() {
        let mut config = config();
        config.depth.constant_std_dev = Some(5.0);
        let mut segmenter = Segmenter::new(config).unwrap();
        let depth = DepthFrame::from_pixel(16, 12, Luma([1000]));
        let color = ColorFrame::from_pixel(16, 12, Rgb([10, 20, 30]));
        for _ in 0..2 {
            segmenter.push_frame(&depth, &color).unwrap();
        }

        let report = segmenter.push_frame(&depth, &color).unwrap();
        assert_eq!(report.phase, Phase::Active);
        assert_eq!(report.seeds, 0);
        assert!(report.updated);
        assert_eq!(segmenter.labels().dimensions(), (16, 12));
        assert!(segmenter.labels().pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn mismatched_color_frame_is_skipped() {
        let mut config = config();
        config.depth.constant_std_dev = Some(5.0);
        config.calibration.background_frames = 1;
        let mut segmenter = Segmenter::new(config).unwrap();
        let depth = DepthFrame::from_pixel(16, 12, Luma([1000]));
        segmenter
            .push_frame(&depth, &ColorFrame::new(16, 12))
            .unwrap();
        assert!(segmenter.push_frame(&depth, &ColorFrame::new(8, 8)).is_err());
        assert_eq!(segmenter.label_version(), 0);
    }

    #[test]
    fn subject_distance_ignores_invalid_depth() {
        let depth = DepthFrame::from_fn(4, 1, |x, _| Luma([if x == 0 { INVALID_DEPTH } else { 800 }]));
        let mask = Mask::from_pixel(4, 1, Luma([255]));
        assert_eq!(subject_distance(&depth, &mask), Some(depth_to_meters(800)));
        assert_eq!(subject_distance(&depth, &Mask::new(4, 1)), None);
    }
}
