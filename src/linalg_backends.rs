// src/linalg_backends.rs

use crate::error::{FaciesError, FaciesResult};
use ndarray::{Array1, Array2, ArrayView1};
use std::error::Error;
use std::marker::PhantomData;

#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

// --- Trait Definitions ---

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput<F: 'static> {
    /// Eigenvalues in the order returned by the decomposition (ascending for LAPACK).
    pub eigenvalues: Array1<F>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<F>,
}

/// Trait for symmetric eigendecomposition (similar to LAPACK's DSYEVD).
/// Implementers will typically expect `matrix` to be symmetric.
pub trait BackendEigh<F: 'static + Copy + Send + Sync> {
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, Box<dyn Error + Send + Sync>>;
}

/// Trait for Cholesky factorization of a symmetric positive-definite matrix,
/// returning the lower triangular factor `L` with `A = L L^T`.
pub trait BackendCholesky<F: 'static + Copy + Send + Sync> {
    fn cholesky_lower(&self, matrix: &Array2<F>) -> Result<Array2<F>, Box<dyn Error + Send + Sync>>;
}

// --- NdarrayLinAlgBackend Implementation ---
use ndarray_linalg::{Cholesky as NdLinalgCholesky, Eigh as NdLinalgEigh, UPLO};

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
    Box::new(e)
}

impl BackendEigh<f64> for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, Box<dyn Error + Send + Sync>> {
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

impl BackendCholesky<f64> for NdarrayLinAlgBackend {
    fn cholesky_lower(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, Box<dyn Error + Send + Sync>> {
        matrix.cholesky(UPLO::Lower).map_err(to_dyn_error)
    }
}

// --- LinAlgBackendProvider Dispatch ---

impl<F> BackendEigh<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendEigh<F>,
{
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, Box<dyn Error + Send + Sync>> {
        NdarrayLinAlgBackend.eigh_upper(matrix)
    }
}

impl<F> BackendCholesky<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendCholesky<F>,
{
    fn cholesky_lower(&self, matrix: &Array2<F>) -> Result<Array2<F>, Box<dyn Error + Send + Sync>> {
        NdarrayLinAlgBackend.cholesky_lower(matrix)
    }
}

// --- Cholesky helper shared by the MCD estimator and the mixture model ---

/// Lower Cholesky factor of a covariance matrix, checked for numerical singularity.
///
/// The reciprocal condition number is estimated from the factor's diagonal
/// as `(min L_ii / max L_ii)^2`; anything below machine epsilon is treated as singular.
#[derive(Debug, Clone)]
pub struct CholeskyFactor {
    lower: Array2<f64>,
}

impl CholeskyFactor {
    pub fn factorize(covariance: &Array2<f64>) -> FaciesResult<Self> {
        let dim = covariance.nrows();
        if dim == 0 || covariance.ncols() != dim {
            return Err(FaciesError::InvalidInput(format!(
                "Covariance must be a non-empty square matrix, got {:?}.",
                covariance.dim()
            )));
        }
        let backend = LinAlgBackendProvider::<f64>::new();
        let lower = backend
            .cholesky_lower(covariance)
            .map_err(|e| FaciesError::SingularCovariance(format!("Cholesky factorization failed: {}", e)))?;

        let diagonal = lower.diag();
        if diagonal.iter().any(|&v| !v.is_finite() || v <= 0.0) {
            return Err(FaciesError::SingularCovariance(
                "Cholesky factor has a non-positive or non-finite diagonal.".into(),
            ));
        }
        let factor = Self { lower };
        let rcond = factor.reciprocal_condition();
        if rcond < f64::EPSILON {
            return Err(FaciesError::SingularCovariance(format!(
                "Reciprocal condition estimate {:e} is below machine epsilon.",
                rcond
            )));
        }
        Ok(factor)
    }

    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    /// `ln det(A) = 2 * sum(ln L_ii)`.
    pub fn log_determinant(&self) -> f64 {
        2.0 * self.lower.diag().iter().map(|v| v.ln()).sum::<f64>()
    }

    pub fn reciprocal_condition(&self) -> f64 {
        let diagonal = self.lower.diag();
        let (min_d, max_d) = diagonal
            .iter()
            .fold((f64::INFINITY, 0.0f64), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if max_d <= 0.0 {
            return 0.0;
        }
        let ratio = min_d / max_d;
        ratio * ratio
    }

    /// Squared Mahalanobis norm `x^T A^{-1} x` of an already-centered vector,
    /// by forward substitution `L z = x`.
    pub fn mahalanobis_squared(&self, centered: ArrayView1<f64>) -> f64 {
        let dim = self.dim();
        let mut z = vec![0.0f64; dim];
        let mut total = 0.0;
        for i in 0..dim {
            let mut acc = centered[i];
            for j in 0..i {
                acc -= self.lower[[i, j]] * z[j];
            }
            z[i] = acc / self.lower[[i, i]];
            total += z[i] * z[i];
        }
        total
    }
}

/// Replaces `m` by `(m + m^T) / 2` in place.
pub fn symmetrize(m: &mut Array2<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (m[[i, j]] + m[[j, i]]);
            m[[i, j]] = avg;
            m[[j, i]] = avg;
        }
    }
}
