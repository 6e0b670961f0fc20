//! Two-dimensional Gaussian mixture appearance model.
//!
//! The model is trained on the hue/saturation features of the pixels a mask
//! selects: k-means gives the initial clusters, then expectation
//! maximization refines weights, means and diagonal variances until the
//! average log-likelihood stops moving or the loop budget runs out.
//!
//! All per-sample and per-cluster work runs on a worker pool owned by the
//! model. Every parallel step writes a disjoint partition of its output and
//! completes before the next step reads it.

use std::f32::consts::PI;
use std::sync::Arc;

use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2, Axis, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::features::FeatureImage;
use super::kmeans::{Clustering, KMeans};
use crate::config::GmmConfig;
use crate::error::{Result, SegmentError};
use crate::frame::{ensure_dimensions, ColorFrame, Mask};

/// Smallest positive normal `f32`, used wherever a probability would hit zero
pub const EPSILON: f32 = f32::MIN_POSITIVE;

/// Variances below this are raised to it when evaluating a density, so
/// a cluster of identical samples stays a finite, very peaked Gaussian.
const MIN_EVAL_VARIANCE: f32 = 1e-2;

pub type CostImage = ImageBuffer<Luma<u16>, Vec<u16>>;
pub type ProbabilityImage = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GaussianComponent {
    pub mean: [f32; 2],
    /// Diagonal of the covariance
    pub variance: [f32; 2],
    pub weight: f32,
}

impl GaussianComponent {
    /// Product of the two independent 1-D normal densities at `x`.
    #[inline]
    pub fn density(&self, x: [f32; 2]) -> f32 {
        let vx = self.variance[0].max(MIN_EVAL_VARIANCE);
        let vy = self.variance[1].max(MIN_EVAL_VARIANCE);
        let dx = x[0] - self.mean[0];
        let dy = x[1] - self.mean[1];
        let norm = 1.0 / (2.0 * PI * (vx * vy).sqrt());
        norm * (-(dx * dx) / (2.0 * vx) - (dy * dy) / (2.0 * vy)).exp()
    }

    /// Natural log of [`density`](Self::density), finite where the density
    /// itself underflows.
    #[inline]
    pub fn log_density(&self, x: [f32; 2]) -> f32 {
        let vx = self.variance[0].max(MIN_EVAL_VARIANCE);
        let vy = self.variance[1].max(MIN_EVAL_VARIANCE);
        let dx = x[0] - self.mean[0];
        let dy = x[1] - self.mean[1];
        -(2.0 * PI).ln() - 0.5 * (vx * vy).ln() - (dx * dx) / (2.0 * vx) - (dy * dy) / (2.0 * vy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mixture {
    components: Vec<GaussianComponent>,
}

impl Mixture {
    pub fn new(components: Vec<GaussianComponent>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Weighted sum of the component densities, unfloored
    #[inline]
    pub fn likelihood(&self, x: [f32; 2]) -> f32 {
        self.components.iter().map(|c| c.weight * c.density(x)).sum()
    }

    pub fn total_weight(&self) -> f32 {
        self.components.iter().map(|c| c.weight).sum()
    }
}

/// Color model of one class (foreground or background).
pub struct ColorAppearanceModel {
    config: GmmConfig,
    pool: ThreadPool,
    features: Option<Arc<FeatureImage>>,
    mixture: Option<Mixture>,
}

impl ColorAppearanceModel {
    pub fn new(config: &GmmConfig) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads.max(1))
            .thread_name(|i| format!("gmm-{i}"))
            .build()
            .map_err(|e| SegmentError::Config(format!("failed to build EM worker pool: {e}")))?;
        Ok(Self {
            config: config.clone(),
            pool,
            features: None,
            mixture: None,
        })
    }

    pub fn set_cluster_count(&mut self, count: usize) {
        self.config.set_cluster_count(count);
    }

    pub fn set_min_likelihood_delta(&mut self, delta: f32) {
        self.config.set_min_likelihood_delta(delta);
    }

    pub fn set_max_em_loops(&mut self, loops: u32) {
        self.config.set_max_em_loops(loops);
    }

    pub fn set_max_cost(&mut self, cost: u32) {
        self.config.set_max_cost(cost);
    }

    /// Converts and stores the frame the model will be trained on and
    /// evaluated against. Any previous fit is discarded.
    pub fn set_image(&mut self, frame: &ColorFrame) {
        self.set_features(Arc::new(FeatureImage::from_frame(frame)));
    }

    /// Same as [`set_image`](Self::set_image) for features already
    /// computed, so two models can share one conversion.
    pub fn set_features(&mut self, features: Arc<FeatureImage>) {
        self.features = Some(features);
        self.mixture = None;
    }

    pub fn is_fitted(&self) -> bool {
        self.mixture.is_some()
    }

    pub fn mixture(&self) -> Option<&Mixture> {
        self.mixture.as_ref()
    }

    /// Fits the mixture to the pixels selected by `mask`, replacing the
    /// previous mixture as a whole.
    pub fn fit(&mut self, mask: &Mask) -> Result<&Mixture> {
        let _span = tracing::debug_span!("gmm_fit").entered();

        let features = self
            .features
            .as_ref()
            .ok_or(SegmentError::UninitializedModel("color image"))?;
        ensure_dimensions("training mask", features.dimensions(), mask.dimensions())?;

        let selected: Vec<f32> = features
            .features()
            .iter()
            .zip(mask.pixels())
            .filter(|(_, m)| m[0] != 0)
            .flat_map(|(f, _)| *f)
            .collect();
        let n = selected.len() / 2;
        if n == 0 {
            self.mixture = None;
            return Err(SegmentError::EmptyRegion("training mask"));
        }
        let samples = Array2::from_shape_vec((n, 2), selected)
            .map_err(|_| SegmentError::shape("training samples", (n as u32, 2), (0, 0)))?;

        let config = &self.config;
        let mixture = self.pool.install(|| fit_mixture(samples.view(), config));
        tracing::debug!("Fitted {} components on {} samples", mixture.len(), n);

        Ok(self.mixture.insert(mixture))
    }

    /// Mixture probability of every selected pixel, floored at [`EPSILON`];
    /// unselected pixels are 0.
    pub fn probabilities(&self, mask: &Mask) -> Result<ProbabilityImage> {
        let features = self
            .features
            .as_ref()
            .ok_or(SegmentError::UninitializedModel("color image"))?;
        let mixture = self
            .mixture
            .as_ref()
            .ok_or(SegmentError::UninitializedModel("color mixture"))?;
        let (width, height) = features.dimensions();
        ensure_dimensions("cost mask", (width, height), mask.dimensions())?;

        let mask = mask.as_raw();
        let values: Vec<f32> = self.pool.install(|| {
            features
                .features()
                .par_iter()
                .zip(mask.par_iter())
                .map(|(&x, &m)| if m == 0 { 0.0 } else { mixture.likelihood(x).max(EPSILON) })
                .collect()
        });

        ProbabilityImage::from_vec(width, height, values)
            .ok_or_else(|| SegmentError::shape("probability image", (width, height), (0, 0)))
    }

    /// Data cost `round(max_cost * -log10(p))` of every selected pixel,
    /// clamped to the `u16` range; unselected pixels cost 0.
    pub fn costs(&self, mask: &Mask) -> Result<CostImage> {
        let _span = tracing::debug_span!("costs").entered();
        let probabilities = self.probabilities(mask)?;
        let max_cost = self.config.max_cost as f32;
        let (width, height) = probabilities.dimensions();

        let costs = probabilities
            .as_raw()
            .iter()
            .map(|&p| {
                if p == 0.0 {
                    0
                } else {
                    (max_cost * -p.log10()).round().clamp(0.0, u16::MAX as f32) as u16
                }
            })
            .collect();

        CostImage::from_vec(width, height, costs)
            .ok_or_else(|| SegmentError::shape("cost image", (width, height), (0, 0)))
    }
}

fn fit_mixture(samples: ArrayView2<f32>, config: &GmmConfig) -> Mixture {
    let kmeans = KMeans {
        clusters: config.clusters,
        max_iterations: config.kmeans_iterations,
        epsilon: config.kmeans_epsilon,
        attempts: config.kmeans_attempts,
    };
    let mut rng = StdRng::seed_from_u64(config.rng_seed);
    let clustering = kmeans.run(samples, &mut rng);

    let mut mixture = initial_mixture(samples, &clustering);
    let mut likelihood = log_likelihood(samples, &mixture);

    let _span = tracing::debug_span!("em_loop").entered();
    for round in 1..=config.max_em_loops.max(1) {
        let responsibilities = expectation(samples, &mixture);
        let updated = maximization(samples, responsibilities.view());
        let updated_likelihood = log_likelihood(samples, &updated);
        mixture = updated;

        let delta = (updated_likelihood - likelihood).abs();
        likelihood = updated_likelihood;
        if delta < config.min_likelihood_delta as f64 {
            tracing::trace!("EM converged after {} rounds", round);
            break;
        }
    }

    mixture
}

/// Per-cluster variance about the k-means center and population share.
fn initial_mixture(samples: ArrayView2<f32>, clustering: &Clustering) -> Mixture {
    let n = samples.nrows() as f64;
    let components = (0..clustering.centers.nrows())
        .into_par_iter()
        .map(|c| {
            let center = clustering.centers.row(c);
            let mut count = 0usize;
            let mut spread = [0.0f64; 2];
            for (x, _) in samples
                .axis_iter(Axis(0))
                .zip(&clustering.labels)
                .filter(|(_, &label)| label == c)
            {
                count += 1;
                for d in 0..2 {
                    let diff = (x[d] - center[d]) as f64;
                    spread[d] += diff * diff;
                }
            }
            let variance = if count > 0 {
                [(spread[0] / count as f64) as f32, (spread[1] / count as f64) as f32]
            } else {
                [0.0; 2]
            };
            GaussianComponent {
                mean: [center[0], center[1]],
                variance,
                weight: (count as f64 / n) as f32,
            }
        })
        .collect();
    Mixture::new(components)
}

/// E-step: responsibility of every component for every sample, one row
/// per sample. Rows are normalised in log space so every sample sums to 1
/// even when all of its densities underflow.
fn expectation(samples: ArrayView2<f32>, mixture: &Mixture) -> Array2<f32> {
    let mut gamma = Array2::<f32>::zeros((samples.nrows(), mixture.len()));
    Zip::from(gamma.rows_mut())
        .and(samples.rows())
        .par_for_each(|mut row, x| {
            let x = [x[0], x[1]];
            for (g, component) in row.iter_mut().zip(mixture.components()) {
                *g = if component.weight > 0.0 {
                    component.weight.ln() + component.log_density(x)
                } else {
                    f32::NEG_INFINITY
                };
            }
            let max = row.fold(f32::NEG_INFINITY, |m, &g| m.max(g));
            if !max.is_finite() {
                // every component collapsed
                row.fill(1.0 / row.len() as f32);
                return;
            }
            row.mapv_inplace(|g| (g - max).exp());
            let total = row.sum();
            row.mapv_inplace(|g| g / total);
        });
    gamma
}

/// M-step: new weights, means, then variances about the new means. A
/// component with no effective population collapses to zero.
fn maximization(samples: ArrayView2<f32>, gamma: ArrayView2<f32>) -> Mixture {
    let n = samples.nrows() as f64;
    let components = (0..gamma.ncols())
        .into_par_iter()
        .map(|c| {
            let resp = gamma.column(c);
            let population: f64 = resp.iter().map(|&g| g as f64).sum();
            if population == 0.0 {
                return GaussianComponent::default();
            }

            let mut mean = [0.0f64; 2];
            for (x, &g) in samples.axis_iter(Axis(0)).zip(resp.iter()) {
                mean[0] += g as f64 * x[0] as f64;
                mean[1] += g as f64 * x[1] as f64;
            }
            let mean = [(mean[0] / population) as f32, (mean[1] / population) as f32];

            let mut spread = [0.0f64; 2];
            for (x, &g) in samples.axis_iter(Axis(0)).zip(resp.iter()) {
                for d in 0..2 {
                    let diff = x[d] as f64 - mean[d] as f64;
                    spread[d] += g as f64 * diff * diff;
                }
            }

            GaussianComponent {
                mean,
                variance: [(spread[0] / population) as f32, (spread[1] / population) as f32],
                weight: (population / n) as f32,
            }
        })
        .collect();
    Mixture::new(components)
}

/// Mean over samples of `log10` of the floored mixture likelihood.
fn log_likelihood(samples: ArrayView2<f32>, mixture: &Mixture) -> f64 {
    let total: f64 = samples
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|x| (mixture.likelihood([x[0], x[1]]).max(EPSILON) as f64).log10())
        .sum();
    total / samples.nrows().max(1) as f64
}
