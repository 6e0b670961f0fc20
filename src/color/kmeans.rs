use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rayon::prelude::*;

/// Result of a k-means run
#[derive(Debug, Clone)]
pub struct Clustering {
    /// One row per cluster
    pub centers: Array2<f32>,
    /// Cluster index per sample
    pub labels: Vec<usize>,
    /// Sum of squared distances of samples to their centers
    pub compactness: f64,
}

/// Lloyd's algorithm with k-means++ seeding, restarted `attempts` times;
/// the most compact clustering wins.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    pub clusters: usize,
    pub max_iterations: u32,
    pub epsilon: f32,
    pub attempts: u32,
}

#[inline]
fn squared_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl KMeans {
    /// Clusters the rows of `samples`. Must run inside the caller's worker
    /// pool; the assignment step is parallel over samples.
    pub fn run<R: Rng>(&self, samples: ArrayView2<f32>, rng: &mut R) -> Clustering {
        let mut best: Option<Clustering> = None;
        for _ in 0..self.attempts.max(1) {
            let candidate = self.attempt(samples, rng);
            if best.as_ref().map_or(true, |b| candidate.compactness < b.compactness) {
                best = Some(candidate);
            }
        }
        // attempts.max(1) guarantees one candidate
        best.unwrap_or_else(|| self.attempt(samples, rng))
    }

    fn attempt<R: Rng>(&self, samples: ArrayView2<f32>, rng: &mut R) -> Clustering {
        let mut centers = self.seed_centers(samples, rng);
        let mut labels = vec![0usize; samples.nrows()];
        let mut compactness = assign(samples, centers.view(), &mut labels);

        for _ in 0..self.max_iterations {
            let updated = self.update_centers(samples, &labels, &centers);
            let shift = centers
                .rows()
                .into_iter()
                .zip(updated.rows())
                .map(|(old, new)| squared_distance(old, new))
                .fold(0.0f32, f32::max)
                .sqrt();
            centers = updated;
            compactness = assign(samples, centers.view(), &mut labels);
            if shift <= self.epsilon {
                break;
            }
        }

        Clustering {
            centers,
            labels,
            compactness,
        }
    }

    /// k-means++: each further center is drawn with probability
    /// proportional to its squared distance to the nearest chosen center.
    fn seed_centers<R: Rng>(&self, samples: ArrayView2<f32>, rng: &mut R) -> Array2<f32> {
        let n = samples.nrows();
        let mut centers = Array2::<f32>::zeros((self.clusters, samples.ncols()));
        if n == 0 {
            return centers;
        }

        let first = rng.gen_range(0..n);
        centers.row_mut(0).assign(&samples.row(first));
        let mut nearest: Vec<f32> = samples
            .axis_iter(Axis(0))
            .map(|x| squared_distance(x, samples.row(first)))
            .collect();

        for c in 1..self.clusters {
            let total: f64 = nearest.iter().map(|&d| d as f64).sum();
            let chosen = if total > 0.0 {
                let mut target = rng.gen_range(0.0..total);
                nearest
                    .iter()
                    .position(|&d| {
                        target -= d as f64;
                        target < 0.0
                    })
                    .unwrap_or(n - 1)
            } else {
                rng.gen_range(0..n)
            };

            centers.row_mut(c).assign(&samples.row(chosen));
            for (d, x) in nearest.iter_mut().zip(samples.axis_iter(Axis(0))) {
                *d = d.min(squared_distance(x, samples.row(chosen)));
            }
        }
        centers
    }

    fn update_centers(&self, samples: ArrayView2<f32>, labels: &[usize], previous: &Array2<f32>) -> Array2<f32> {
        let mut sums = Array2::<f64>::zeros(previous.raw_dim());
        let mut counts = vec![0usize; self.clusters];
        for (x, &label) in samples.axis_iter(Axis(0)).zip(labels) {
            counts[label] += 1;
            for (s, &v) in sums.row_mut(label).iter_mut().zip(x.iter()) {
                *s += v as f64;
            }
        }

        let mut centers = previous.clone();
        for (c, &count) in counts.iter().enumerate() {
            // an emptied cluster keeps its previous center
            if count > 0 {
                for (dst, &s) in centers.row_mut(c).iter_mut().zip(sums.row(c).iter()) {
                    *dst = (s / count as f64) as f32;
                }
            }
        }
        centers
    }
}

/// Assigns every sample to its nearest center, returning the compactness.
fn assign(samples: ArrayView2<f32>, centers: ArrayView2<f32>, labels: &mut [usize]) -> f64 {
    labels
        .par_iter_mut()
        .enumerate()
        .map(|(i, label)| {
            let x = samples.row(i);
            let (best, distance) = centers
                .axis_iter(Axis(0))
                .enumerate()
                .map(|(c, center)| (c, squared_distance(x, center)))
                .fold((0, f32::INFINITY), |acc, cur| if cur.1 < acc.1 { cur } else { acc });
            *label = best;
            distance as f64
        })
        .sum()
}
