// Synthetic data shared by the unit tests.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Standard-normal data of shape (n_samples, n_features), seeded for reproducibility.
pub(crate) fn generate_random_data(n_samples: usize, n_features: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    Array2::from_shape_fn((n_samples, n_features), |_| normal.sample(&mut rng))
}

/// Isotropic Gaussian blobs around `centers`, `per_blob` rows each, blob by blob.
/// Returns the data and the generating blob index (0-based) of every row.
pub(crate) fn gaussian_blobs(
    centers: &[Vec<f64>],
    per_blob: usize,
    std_dev: f64,
    seed: u64,
) -> (Array2<f64>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, std_dev).unwrap();
    let n_features = centers[0].len();
    let mut data = Array2::<f64>::zeros((centers.len() * per_blob, n_features));
    let mut labels = Vec::with_capacity(centers.len() * per_blob);
    for (blob, center) in centers.iter().enumerate() {
        for i in 0..per_blob {
            let row = blob * per_blob + i;
            for (j, &c) in center.iter().enumerate() {
                data[[row, j]] = c + normal.sample(&mut rng);
            }
            labels.push(blob);
        }
    }
    (data, labels)
}

/// Five blobs on a pentagon of radius 10 in the first two coordinates, flat in the third.
pub(crate) fn pentagon_blobs(per_blob: usize, seed: u64) -> (Array2<f64>, Vec<usize>) {
    let centers: Vec<Vec<f64>> = (0..5)
        .map(|k| {
            let angle = 2.0 * std::f64::consts::PI * k as f64 / 5.0;
            vec![10.0 * angle.cos(), 10.0 * angle.sin(), 0.0]
        })
        .collect();
    gaussian_blobs(&centers, per_blob, 0.6, seed)
}

/// Appends `count` rows far from everything else.
pub(crate) fn with_outliers(data: &Array2<f64>, count: usize, magnitude: f64, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (n, p) = data.dim();
    let mut out = Array2::<f64>::zeros((n + count, p));
    out.slice_mut(ndarray::s![..n, ..]).assign(data);
    for i in 0..count {
        for j in 0..p {
            out[[n + i, j]] = magnitude + rng.gen_range(0.0..1.0);
        }
    }
    out
}
