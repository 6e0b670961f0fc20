//! Tunable parameters for every stage, loadable from TOML.
//!
//! Defaults reproduce the tuning the pipeline was developed with on a
//! 640x480 depth+color sensor.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SegmentError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub calibration: CalibrationConfig,
    pub depth: DepthConfig,
    pub seed: SeedConfig,
    pub gmm: GmmConfig,
    pub graph: GraphConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Static frames accumulated for the depth noise table
    pub noise_frames: usize,
    /// Static frames averaged into the background reference
    pub background_frames: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            noise_frames: 30,
            background_frames: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    /// Raw depth above which reconstruction is considered unreliable
    pub max_depth: u16,
    /// Radius of the disk used to erode the raw foreground
    pub foreground_smoothing: u32,
    /// Skip noise calibration and use this standard deviation everywhere
    pub constant_std_dev: Option<f32>,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            max_depth: 2000,
            foreground_smoothing: 5,
            constant_std_dev: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Components smaller than this many pixels are dropped
    pub min_area: u32,
    /// Dilation radius used to grow the unknown band and background ring
    pub dilation: u32,
    /// Only segment the largest seed each frame
    pub largest_only: bool,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            min_area: 128,
            dilation: 16,
            largest_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GmmConfig {
    pub clusters: usize,
    pub min_likelihood_delta: f32,
    pub max_em_loops: u32,
    pub max_cost: u32,
    pub kmeans_iterations: u32,
    pub kmeans_epsilon: f32,
    pub kmeans_attempts: u32,
    pub threads: usize,
    pub rng_seed: u64,
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            clusters: 3,
            min_likelihood_delta: 0.1,
            max_em_loops: 10,
            max_cost: 100,
            kmeans_iterations: 5,
            kmeans_epsilon: 0.5,
            kmeans_attempts: 2,
            threads: 4,
            rng_seed: 0x5eed,
        }
    }
}

impl GmmConfig {
    pub fn set_cluster_count(&mut self, count: usize) {
        if count >= 1 {
            self.clusters = count;
        }
    }

    pub fn set_min_likelihood_delta(&mut self, delta: f32) {
        if delta > 0.0 {
            self.min_likelihood_delta = delta;
        }
    }

    pub fn set_max_em_loops(&mut self, loops: u32) {
        self.max_em_loops = loops.max(1);
    }

    pub fn set_max_cost(&mut self, cost: u32) {
        if cost > 0 {
            self.max_cost = cost;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Ceiling of the Gaussian color-similarity term
    pub max_smooth_cost: u16,
    /// Falloff of the color-similarity term
    pub sigma: f32,
    /// Added to a link whose two pixels both lie on a Canny edge
    pub edge_bonus: u16,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Offset applied to signed terminal costs before handing them to the oracle
    pub terminal_bias: i32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_smooth_cost: 100,
            sigma: 0.1,
            edge_bonus: 10,
            canny_low: 30.0,
            canny_high: 50.0,
            terminal_bias: 32767,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gmm.clusters == 0 {
            return Err(SegmentError::Config("gmm.clusters must be at least 1".into()));
        }
        if self.gmm.threads == 0 {
            return Err(SegmentError::Config("gmm.threads must be at least 1".into()));
        }
        if self.seed.dilation == 0 {
            return Err(SegmentError::Config(
                "seed.dilation must be at least 1, otherwise no pixel is left to decide".into(),
            ));
        }
        if self.graph.sigma <= 0.0 {
            return Err(SegmentError::Config("graph.sigma must be positive".into()));
        }
        if self.depth.constant_std_dev.is_none() && self.calibration.noise_frames == 0 {
            return Err(SegmentError::Config(
                "either calibration.noise_frames or depth.constant_std_dev is required".into(),
            ));
        }
        if self.calibration.background_frames == 0 {
            return Err(SegmentError::Config(
                "calibration.background_frames must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SegmenterConfig> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: SegmenterConfig =
        toml::from_str(&contents).map_err(|e| SegmentError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
