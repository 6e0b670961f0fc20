use crate::error::{Result, SegmentError};
use crate::frame::{ensure_dimensions, ensure_non_empty, DepthFrame};

/// Number of raw depth magnitudes the noise table covers
pub const NOISE_TABLE_SIZE: usize = 16384;

/// Standard deviation of the sensor noise indexed by raw depth.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseTable {
    values: Vec<f32>,
}

impl NoiseTable {
    pub fn constant(value: f32) -> Self {
        Self {
            values: vec![value; NOISE_TABLE_SIZE],
        }
    }

    /// Standard deviation for a raw depth value. Depths past the end of the
    /// table read the last entry.
    #[inline]
    pub fn std_dev(&self, depth: u16) -> f32 {
        let index = (depth as usize).min(NOISE_TABLE_SIZE - 1);
        self.values[index]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    fn from_observations(sums: &[f64], counts: &[f64]) -> Self {
        let mut values: Vec<f32> = sums
            .iter()
            .zip(counts)
            .map(|(&sum, &count)| {
                if count > 0.0 {
                    (sum / count).sqrt() as f32
                } else {
                    0.0
                }
            })
            .collect();
        fill_gaps(&mut values);
        Self { values }
    }
}

/// Replaces every zero run by a linear ramp between its two non-zero
/// neighbours; runs touching either end copy the nearest non-zero value.
fn fill_gaps(values: &mut [f32]) {
    let known: Vec<usize> = (0..values.len()).filter(|&i| values[i] != 0.0).collect();
    let (Some(&first), Some(&last)) = (known.first(), known.last()) else {
        return;
    };

    let head = values[first];
    values[..first].iter_mut().for_each(|v| *v = head);
    let tail = values[last];
    values[last + 1..].iter_mut().for_each(|v| *v = tail);

    for pair in known.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if end - start < 2 {
            continue;
        }
        let (from, to) = (values[start], values[end]);
        let span = (end - start) as f32;
        for i in start + 1..end {
            values[i] = from + (to - from) * (i - start) as f32 / span;
        }
    }
}

/// Estimates depth noise from a burst of frames of a static scene.
///
/// Each pixel contributes its squared deviations from its own temporal mean
/// to the table entry at its rounded mean depth; the table holds the root
/// mean square per entry.
#[derive(Debug, Default)]
pub struct DepthNoiseModel {
    resolution: Option<(u32, u32)>,
    frames: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    table: Option<NoiseTable>,
}

impl DepthNoiseModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates one calibration frame. The first frame fixes the
    /// resolution; later frames must match it.
    pub fn feed(&mut self, frame: &DepthFrame) -> Result<()> {
        ensure_non_empty("noise calibration frame", frame.dimensions())?;
        match self.resolution {
            Some(resolution) => {
                ensure_dimensions("noise calibration frame", resolution, frame.dimensions())?
            }
            None => {
                let len = frame.as_raw().len();
                self.resolution = Some(frame.dimensions());
                self.sum = vec![0.0; len];
                self.sum_sq = vec![0.0; len];
            }
        }

        for ((sum, sum_sq), &depth) in self.sum.iter_mut().zip(self.sum_sq.iter_mut()).zip(frame.as_raw()) {
            let depth = depth as f64;
            *sum += depth;
            *sum_sq += depth * depth;
        }
        self.frames += 1;
        Ok(())
    }

    pub fn frames_fed(&self) -> usize {
        self.frames
    }

    /// Builds the noise table from the accumulated frames and clears them.
    ///
    /// Without any fed frame the model is left invalid.
    pub fn compute(&mut self) -> Result<&NoiseTable> {
        let _span = tracing::debug_span!("noise_table").entered();

        if self.frames == 0 {
            self.table = None;
            return Err(SegmentError::UninitializedModel("noise calibration burst"));
        }

        let n = self.frames as f64;
        let mut sums = vec![0.0f64; NOISE_TABLE_SIZE];
        let mut counts = vec![0.0f64; NOISE_TABLE_SIZE];
        for (&sum, &sum_sq) in self.sum.iter().zip(&self.sum_sq) {
            let mean = sum / n;
            let index = mean.round() as usize;
            if index >= NOISE_TABLE_SIZE {
                continue;
            }
            // sum of squared deviations from the pixel's own mean
            let deviation = (sum_sq - sum * mean).max(0.0);
            sums[index] += deviation;
            counts[index] += n;
        }

        let table = NoiseTable::from_observations(&sums, &counts);
        if table.values.iter().all(|&v| v == 0.0) {
            tracing::warn!("Noise calibration observed no depth variation");
        }
        tracing::info!("Noise table computed from {} frames", self.frames);

        self.clear_sources();
        Ok(self.table.insert(table))
    }

    /// Bypasses estimation with a uniform standard deviation. A negative
    /// value invalidates the model.
    pub fn set_std_dev(&mut self, value: f32) {
        self.clear_sources();
        self.table = if value < 0.0 {
            None
        } else {
            Some(NoiseTable::constant(value))
        };
    }

    pub fn table(&self) -> Option<&NoiseTable> {
        self.table.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.table.is_some()
    }

    fn clear_sources(&mut self) {
        self.resolution = None;
        self.frames = 0;
        self.sum = Vec::new();
        self.sum_sq = Vec::new();
    }
}
