use std::sync::atomic::{AtomicBool, Ordering};

use image::{ImageBuffer, Luma};
use imageproc::morphology::Mask as StructuringElement;

use super::noise::{DepthNoiseModel, NoiseTable};
use crate::config::DepthConfig;
use crate::error::{Result, SegmentError};
use crate::frame::{ensure_dimensions, ensure_non_empty, DepthFrame, Mask, Trimap, MASK_OFF, MASK_ON};
use crate::morphology;

/// Mean depth of the empty scene
pub type ReferenceDepth = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundState {
    Empty,
    Accumulating,
    Built,
    /// A frame has been classified against the current reference
    Active,
}

/// Per-pixel background reference built from a calibration burst.
#[derive(Debug, Clone)]
pub struct BackgroundReference {
    pub mean: ReferenceDepth,
    /// 255 where no calibration sample ever exceeded the max depth
    pub reliable: Mask,
}

/// Depth background subtraction: a reference of the empty scene plus the
/// sensor noise model, used to split live frames into a trimap.
pub struct BackgroundModel {
    max_depth: u16,
    erode_element: StructuringElement,
    noise: DepthNoiseModel,

    resolution: Option<(u32, u32)>,
    frames: usize,
    sum: Vec<f64>,
    exceeded: Vec<bool>,
    reference: Option<BackgroundReference>,
    classified: AtomicBool,
}

impl BackgroundModel {
    pub fn new(config: &DepthConfig) -> Self {
        let mut noise = DepthNoiseModel::new();
        if let Some(std_dev) = config.constant_std_dev {
            noise.set_std_dev(std_dev);
        }
        Self {
            max_depth: config.max_depth,
            erode_element: morphology::disk(config.foreground_smoothing),
            noise,
            resolution: None,
            frames: 0,
            sum: Vec::new(),
            exceeded: Vec::new(),
            reference: None,
            classified: AtomicBool::new(false),
        }
    }

    /// Depth beyond which reconstruction is considered unreliable
    pub fn set_max(&mut self, max_depth: u16) {
        self.max_depth = max_depth;
    }

    /// Radius of the erosion applied to the raw foreground
    pub fn set_foreground_smoothing(&mut self, radius: u32) {
        self.erode_element = morphology::disk(radius);
    }

    pub fn noise(&self) -> &DepthNoiseModel {
        &self.noise
    }

    pub fn noise_mut(&mut self) -> &mut DepthNoiseModel {
        &mut self.noise
    }

    pub fn feed_noise(&mut self, frame: &DepthFrame) -> Result<()> {
        self.noise.feed(frame)
    }

    pub fn compute_noise(&mut self) -> Result<()> {
        self.noise.compute().map(|_| ())
    }

    pub fn set_std_dev(&mut self, value: f32) {
        self.noise.set_std_dev(value);
    }

    pub fn state(&self) -> BackgroundState {
        match (&self.reference, self.frames) {
            (_, n) if n > 0 => BackgroundState::Accumulating,
            (Some(_), _) if self.classified.load(Ordering::Relaxed) => BackgroundState::Active,
            (Some(_), _) => BackgroundState::Built,
            (None, _) => BackgroundState::Empty,
        }
    }

    pub fn reference(&self) -> Option<&BackgroundReference> {
        self.reference.as_ref()
    }

    /// Adds one frame of the empty scene. The first frame fixes the
    /// resolution; frames of any other size are rejected.
    pub fn feed(&mut self, frame: &DepthFrame) -> Result<()> {
        ensure_non_empty("background frame", frame.dimensions())?;
        match self.resolution {
            Some(resolution) => ensure_dimensions("background frame", resolution, frame.dimensions())?,
            None => {
                let len = frame.as_raw().len();
                self.resolution = Some(frame.dimensions());
                self.sum = vec![0.0; len];
                self.exceeded = vec![false; len];
            }
        }

        let max = self.max_depth;
        for ((sum, exceeded), &depth) in self.sum.iter_mut().zip(self.exceeded.iter_mut()).zip(frame.as_raw()) {
            *sum += depth as f64;
            *exceeded |= depth > max;
        }
        self.frames += 1;
        Ok(())
    }

    /// Averages the accumulated frames into the reference. A pixel that
    /// exceeded the max depth in any frame is unreliable for good.
    pub fn compute(&mut self) -> Result<&BackgroundReference> {
        let _span = tracing::debug_span!("background_reference").entered();

        let Some((width, height)) = self.resolution.filter(|_| self.frames > 0) else {
            self.reference = None;
            return Err(SegmentError::UninitializedModel("background calibration burst"));
        };

        let n = self.frames as f64;
        let mean = ReferenceDepth::from_vec(width, height, self.sum.iter().map(|&s| (s / n) as f32).collect())
            .ok_or_else(|| SegmentError::shape("background reference", (width, height), (0, 0)))?;
        let reliable = Mask::from_vec(
            width,
            height,
            self.exceeded
                .iter()
                .map(|&e| if e { MASK_OFF } else { MASK_ON })
                .collect(),
        )
        .ok_or_else(|| SegmentError::shape("background reliability mask", (width, height), (0, 0)))?;

        tracing::info!(
            "Background reference computed from {} frames ({}x{})",
            self.frames,
            width,
            height
        );

        self.resolution = None;
        self.frames = 0;
        self.sum = Vec::new();
        self.exceeded = Vec::new();
        self.classified.store(false, Ordering::Relaxed);
        Ok(self.reference.insert(BackgroundReference { mean, reliable }))
    }

    /// Splits a live frame into background / foreground / unknown.
    ///
    /// Background where the deviation from the reference is within 2 sigma,
    /// foreground beyond 3 sigma, unknown otherwise. Pixels that are invalid
    /// in the frame or unreliable in the reference are always unknown.
    pub fn classify(&self, frame: &DepthFrame) -> Result<Trimap> {
        let _span = tracing::debug_span!("classify").entered();

        let noise = self
            .noise
            .table()
            .ok_or(SegmentError::UninitializedModel("depth noise table"))?;
        let reference = self
            .reference
            .as_ref()
            .ok_or(SegmentError::UninitializedModel("background reference"))?;
        ensure_dimensions("depth frame", reference.mean.dimensions(), frame.dimensions())?;

        let (background, raw_foreground) = self.threshold(frame, reference, noise);
        let foreground = morphology::erode(&raw_foreground, &self.erode_element);
        let unknown = morphology::complement(&morphology::union(&background, &foreground));
        self.classified.store(true, Ordering::Relaxed);

        Ok(Trimap {
            background,
            foreground,
            unknown,
        })
    }

    fn threshold(&self, frame: &DepthFrame, reference: &BackgroundReference, noise: &NoiseTable) -> (Mask, Mask) {
        let (width, height) = frame.dimensions();
        let mut background = Mask::new(width, height);
        let mut foreground = Mask::new(width, height);

        for (((bg, fg), (&depth, &mean)), reliable) in background
            .pixels_mut()
            .zip(foreground.pixels_mut())
            .zip(frame.as_raw().iter().zip(reference.mean.as_raw()))
            .zip(reference.reliable.pixels())
        {
            if depth > self.max_depth || reliable[0] == MASK_OFF {
                continue;
            }
            let diff = (depth as f32 - mean).abs();
            let sigma = noise.std_dev(depth);
            if diff <= 2.0 * sigma {
                bg[0] = MASK_ON;
            } else if diff > 3.0 * sigma {
                fg[0] = MASK_ON;
            }
        }

        (background, foreground)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::count;

    fn constant(width: u32, height: u32, depth: u16) -> DepthFrame {
        DepthFrame::from_pixel(width, height, Luma([depth]))
    }

    fn calibrated(width: u32, height: u32, smoothing: u32) -> BackgroundModel {
        let config = DepthConfig {
            foreground_smoothing: smoothing,
            ..DepthConfig::default()
        };
        let mut model = BackgroundModel::new(&config);
        for _ in 0..10 {
            model.feed(&constant(width, height, 1000)).unwrap();
        }
        model.set_std_dev(5.0);
        model.compute().unwrap();
        model
    }

    fn assert_partition(trimap: &Trimap) {
        for ((bg, fg), unknown) in trimap
            .background
            .pixels()
            .zip(trimap.foreground.pixels())
            .zip(trimap.unknown.pixels())
        {
            assert!(!(bg[0] != 0 && fg[0] != 0), "background and foreground overlap");
            assert_eq!(unknown[0] != 0, bg[0] == 0 && fg[0] == 0);
        }
    }

    #[test]
    fn state_machine() {
        let mut model = BackgroundModel::new(&DepthConfig::default());
        assert_eq!(model.state(), BackgroundState::Empty);
        assert!(model.compute().is_err());
        model.feed(&constant(4, 4, 1000)).unwrap();
        assert_eq!(model.state(), BackgroundState::Accumulating);
        assert!(model.feed(&constant(5, 4, 1000)).is_err());
        model.compute().unwrap();
        assert_eq!(model.state(), BackgroundState::Built);

        model.set_std_dev(5.0);
        model.classify(&constant(4, 4, 1000)).unwrap();
        assert_eq!(model.state(), BackgroundState::Active);
        // rejected frames leave the state alone
        let mut fresh = BackgroundModel::new(&DepthConfig::default());
        fresh.set_std_dev(5.0);
        fresh.feed(&constant(4, 4, 1000)).unwrap();
        fresh.compute().unwrap();
        assert!(fresh.classify(&constant(5, 4, 1000)).is_err());
        assert_eq!(fresh.state(), BackgroundState::Built);

        // a new burst starts over
        model.feed(&constant(4, 4, 1000)).unwrap();
        assert_eq!(model.state(), BackgroundState::Accumulating);
        model.compute().unwrap();
        assert_eq!(model.state(), BackgroundState::Built);
    }

    #[test]
    fn unchanged_scene_is_all_background() {
        let model = calibrated(32, 24, 5);
        let trimap = model.classify(&constant(32, 24, 1000)).unwrap();
        assert_eq!(count(&trimap.background), 32 * 24);
        assert_eq!(count(&trimap.foreground), 0);
        assert_eq!(count(&trimap.unknown), 0);
        assert_partition(&trimap);
    }

    #[test]
    fn closer_square_is_foreground() {
        let model = calibrated(40, 40, 0);
        let mut frame = constant(40, 40, 1000);
        for y in 10..20 {
            for x in 10..20 {
                frame.put_pixel(x, y, Luma([950]));
            }
        }
        let trimap = model.classify(&frame).unwrap();
        assert_eq!(count(&trimap.foreground), 100);
        assert_eq!(trimap.foreground.get_pixel(15, 15)[0], MASK_ON);
        assert_eq!(trimap.background.get_pixel(15, 15)[0], MASK_OFF);
        assert_eq!(trimap.background.get_pixel(5, 5)[0], MASK_ON);
        assert_eq!(count(&trimap.background), 40 * 40 - 100);
        assert_partition(&trimap);
    }

    #[test]
    fn erosion_drops_speckles_but_keeps_the_body() {
        let model = calibrated(60, 60, 3);
        let mut frame = constant(60, 60, 1000);
        for y in 10..40 {
            for x in 10..40 {
                frame.put_pixel(x, y, Luma([950]));
            }
        }
        frame.put_pixel(50, 50, Luma([900]));
        let trimap = model.classify(&frame).unwrap();
        assert_eq!(trimap.foreground.get_pixel(25, 25)[0], MASK_ON);
        assert_eq!(trimap.foreground.get_pixel(50, 50)[0], MASK_OFF);
        assert_eq!(trimap.unknown.get_pixel(50, 50)[0], MASK_ON);
        assert_partition(&trimap);
    }

    #[test]
    fn intermediate_deviation_is_unknown() {
        let model = calibrated(8, 8, 0);
        let mut frame = constant(8, 8, 1000);
        // 12 lies between 2 sigma and 3 sigma
        frame.put_pixel(3, 3, Luma([988]));
        let trimap = model.classify(&frame).unwrap();
        assert_eq!(trimap.unknown.get_pixel(3, 3)[0], MASK_ON);
        assert_partition(&trimap);
    }

    #[test]
    fn invalid_depth_is_never_classified() {
        let config = DepthConfig {
            foreground_smoothing: 0,
            ..DepthConfig::default()
        };
        let mut model = BackgroundModel::new(&config);
        let mut first = constant(8, 8, 1000);
        first.put_pixel(0, 0, Luma([u16::MAX]));
        model.feed(&first).unwrap();
        model.feed(&constant(8, 8, 1000)).unwrap();
        model.set_std_dev(5.0);
        model.compute().unwrap();

        let mut frame = constant(8, 8, 1000);
        frame.put_pixel(7, 7, Luma([2500]));
        let trimap = model.classify(&frame).unwrap();
        // unreliable in the reference
        assert_eq!(trimap.unknown.get_pixel(0, 0)[0], MASK_ON);
        // beyond max depth in the live frame
        assert_eq!(trimap.unknown.get_pixel(7, 7)[0], MASK_ON);
        assert_partition(&trimap);
    }

    #[test]
    fn classify_requires_models_and_matching_size() {
        let mut model = BackgroundModel::new(&DepthConfig::default());
        model.feed(&constant(4, 4, 1000)).unwrap();
        model.compute().unwrap();
        assert!(matches!(
            model.classify(&constant(4, 4, 1000)),
            Err(SegmentError::UninitializedModel(_))
        ));
        model.set_std_dev(5.0);
        assert!(matches!(
            model.classify(&constant(4, 5, 1000)),
            Err(SegmentError::InputShapeMismatch { .. })
        ));
    }
}
