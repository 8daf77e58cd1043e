// Robust principal component analysis

use crate::error::{FaciesError, FaciesResult};
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};
use crate::mcd::RobustCovariance;
use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Robust principal component analysis structure.
///
/// Components are the eigenvectors of a robust (MCD) covariance estimate, and
/// rows are centered by the robust center rather than the sample mean, so a
/// handful of outlying samples cannot rotate the basis.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RobustPca {
    /// Robust center subtracted from every row.
    /// Shape: (n_features)
    center: Array1<f64>,
    /// The rotation matrix (principal axes as orthonormal columns).
    /// Shape: (n_features, k_components)
    rotation: Array2<f64>,
    /// Robust variance along each axis, descending and non-negative.
    /// Shape: (k_components)
    eigenvalues: Array1<f64>,
    /// Projection of the fitted rows, in input row order.
    /// Shape: (n_samples, k_components)
    scores: Array2<f64>,
}

impl RobustPca {
    /// Fits the robust PCA from an MCD estimate of the same observation matrix.
    pub fn fit(data_matrix: ArrayView2<f64>, robust: &RobustCovariance) -> FaciesResult<Self> {
        Self::from_center_and_covariance(data_matrix, robust.center().view(), robust.covariance())
    }

    /// Fits the robust PCA from an explicit center and covariance.
    ///
    /// * `data_matrix` - Observations, shape (n_samples, n_features).
    /// * `center` - Robust center, shape (n_features).
    /// * `covariance` - Robust covariance, shape (n_features, n_features).
    ///
    /// # Errors
    /// Returns an error if dimensions disagree or the eigendecomposition fails
    /// or yields non-finite values.
    pub fn from_center_and_covariance(
        data_matrix: ArrayView2<f64>,
        center: ArrayView1<f64>,
        covariance: &Array2<f64>,
    ) -> FaciesResult<Self> {
        let n_features = data_matrix.ncols();
        if n_features == 0 || data_matrix.nrows() == 0 {
            return Err(FaciesError::InvalidInput(
                "Input data_matrix has zero samples or zero features.".into(),
            ));
        }
        if center.len() != n_features || covariance.dim() != (n_features, n_features) {
            return Err(FaciesError::InvalidInput(format!(
                "Center ({}) and covariance ({:?}) do not match {} features.",
                center.len(),
                covariance.dim(),
                n_features
            )));
        }

        let backend = LinAlgBackendProvider::<f64>::new();
        let eigh = backend
            .eigh_upper(covariance)
            .map_err(|e| FaciesError::Decomposition(format!("Eigen decomposition of robust covariance failed: {}", e)))?;
        if eigh.eigenvalues.iter().chain(eigh.eigenvectors.iter()).any(|v| !v.is_finite()) {
            return Err(FaciesError::Decomposition(
                "Eigen decomposition of robust covariance produced non-finite values.".into(),
            ));
        }

        // Stable sort: equal eigenvalues keep the order the decomposition returned them in.
        let mut order: Vec<usize> = (0..eigh.eigenvalues.len()).collect();
        order.sort_by(|&a, &b| {
            eigh.eigenvalues[b]
                .partial_cmp(&eigh.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let eigenvalues: Array1<f64> = order.iter().map(|&i| eigh.eigenvalues[i].max(0.0)).collect();
        let rotation = eigh.eigenvectors.select(Axis(1), &order);

        let centered = &data_matrix - &center;
        let scores = centered.dot(&rotation);
        debug!("Robust eigenvalues: {:?}", eigenvalues);
        info!(
            "Projected {} rows onto {} robust principal components.",
            scores.nrows(),
            scores.ncols()
        );

        Ok(Self {
            center: center.to_owned(),
            rotation,
            eigenvalues,
            scores,
        })
    }

    pub fn center(&self) -> &Array1<f64> {
        &self.center
    }

    pub fn rotation(&self) -> &Array2<f64> {
        &self.rotation
    }

    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    pub fn scores(&self) -> &Array2<f64> {
        &self.scores
    }

    pub fn n_components(&self) -> usize {
        self.rotation.ncols()
    }

    /// Fraction of total robust variance carried by each component.
    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        let total: f64 = self.eigenvalues.sum();
        if total > 0.0 {
            self.eigenvalues.mapv(|v| v / total)
        } else {
            Array1::zeros(self.eigenvalues.len())
        }
    }

    /// The first `n_components` score columns.
    pub fn scores_prefix(&self, n_components: usize) -> FaciesResult<ArrayView2<'_, f64>> {
        self.check_prefix(n_components)?;
        Ok(self.scores.slice(s![.., ..n_components]))
    }

    /// A copy of the model keeping only the first `n_components` axes.
    pub fn truncated(&self, n_components: usize) -> FaciesResult<RobustPca> {
        self.check_prefix(n_components)?;
        Ok(RobustPca {
            center: self.center.clone(),
            rotation: self.rotation.slice(s![.., ..n_components]).to_owned(),
            eigenvalues: self.eigenvalues.slice(s![..n_components]).to_owned(),
            scores: self.scores.slice(s![.., ..n_components]).to_owned(),
        })
    }

    fn check_prefix(&self, n_components: usize) -> FaciesResult<()> {
        if n_components == 0 || n_components > self.n_components() {
            return Err(FaciesError::InvalidInput(format!(
                "Requested {} components, model has {}.",
                n_components,
                self.n_components()
            )));
        }
        Ok(())
    }

    /// Projects new observations onto the fitted axes.
    pub fn transform(&self, data_matrix: ArrayView2<f64>) -> FaciesResult<Array2<f64>> {
        if data_matrix.ncols() != self.center.len() {
            return Err(FaciesError::InvalidInput(format!(
                "Input has {} features, model expects {}.",
                data_matrix.ncols(),
                self.center.len()
            )));
        }
        let centered = &data_matrix - &self.center;
        Ok(centered.dot(&self.rotation))
    }

    /// Maps scores back to the observation space: `scores * rotation^T + center`.
    /// Exact for the full basis, a rank-k approximation otherwise.
    pub fn reconstruct(&self, scores: ArrayView2<f64>) -> FaciesResult<Array2<f64>> {
        if scores.ncols() != self.n_components() {
            return Err(FaciesError::InvalidInput(format!(
                "Scores have {} columns, model has {} components.",
                scores.ncols(),
                self.n_components()
            )));
        }
        Ok(scores.dot(&self.rotation.t()) + &self.center)
    }

    /// Saves the model to a file using bincode.
    ///
    /// # Errors
    /// Returns an error if file I/O or serialization fails.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> FaciesResult<()> {
        let file = File::create(path.as_ref())
            .map_err(|e| FaciesError::Artifact(format!("Failed to create file at {:?}: {}", path.as_ref(), e)))?;
        let mut writer = BufWriter::new(file);

        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| FaciesError::Artifact(format!("Failed to serialize robust PCA model: {}", e)))?;
        Ok(())
    }

    /// Loads a model previously saved with `save_model`.
    ///
    /// # Errors
    /// Returns an error if file I/O or deserialization fails, or if the loaded
    /// model has inconsistent dimensions or negative / non-finite eigenvalues.
    pub fn load_model<P: AsRef<Path>>(path: P) -> FaciesResult<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| FaciesError::Artifact(format!("Failed to open file at {:?}: {}", path.as_ref(), e)))?;
        let mut reader = BufReader::new(file);

        let model: RobustPca = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| FaciesError::Artifact(format!("Failed to deserialize robust PCA model: {}", e)))?;

        let n_features = model.center.len();
        let k = model.rotation.ncols();
        if model.rotation.nrows() != n_features || model.eigenvalues.len() != k || model.scores.ncols() != k {
            return Err(FaciesError::Artifact(format!(
                "Loaded robust PCA model has inconsistent dimensions: center={}, rotation={:?}, eigenvalues={}, scores={:?}",
                n_features,
                model.rotation.dim(),
                model.eigenvalues.len(),
                model.scores.dim()
            )));
        }
        if model.eigenvalues.iter().any(|&v| !v.is_finite() || v < 0.0) {
            return Err(FaciesError::Artifact(
                "Loaded robust PCA model has negative or non-finite eigenvalues.".into(),
            ));
        }
        Ok(model)
    }
}
