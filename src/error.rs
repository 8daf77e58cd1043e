// src/error.rs

use std::fmt;

/// Result alias used throughout the crate.
pub type FaciesResult<T> = Result<T, FaciesError>;

/// Which axis of a contingency table an empty margin was found on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableAxis {
    /// A ground-truth category with no observations.
    Truth,
    /// A cluster label with no observations.
    Cluster,
}

/// Fatal errors reported to the caller.
///
/// Per-iteration numerical problems of a mixture fit are not represented here;
/// those are [`FitFailure`]s and are tallied inside a run instead of propagating.
#[derive(Clone, Debug, PartialEq)]
pub enum FaciesError {
    /// A parameter or input matrix is malformed (bad fraction, length mismatch, non-finite value, ...).
    InvalidInput(String),
    /// Too few rows for a stable estimate in the given dimension.
    InsufficientData {
        rows: usize,
        columns: usize,
        required: usize,
    },
    /// No non-singular covariance estimate could be formed.
    SingularCovariance(String),
    /// An eigendecomposition or factorization failed or produced non-finite output.
    Decomposition(String),
    /// Every iteration of a mixture run failed, so there is no best or worst fit.
    AllFitsFailed { attempted: usize },
    /// A contingency table row or column has zero observations.
    EmptyMargin { axis: TableAxis, level: String },
    /// A contingency table admits no association statistic (fewer than two levels, no rows).
    DegenerateTable(String),
    /// Reading or writing a persisted artifact or table failed.
    Artifact(String),
}

impl std::error::Error for FaciesError {}

impl fmt::Display for FaciesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaciesError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            FaciesError::InsufficientData { rows, columns, required } => write!(
                f,
                "Insufficient data: {} rows for {} columns, at least {} rows required.",
                rows, columns, required
            ),
            FaciesError::SingularCovariance(msg) => write!(f, "Singular covariance: {}", msg),
            FaciesError::Decomposition(msg) => write!(f, "Decomposition failed: {}", msg),
            FaciesError::AllFitsFailed { attempted } => write!(
                f,
                "All {} mixture fits failed; no best or worst fit exists.",
                attempted
            ),
            FaciesError::EmptyMargin { axis, level } => {
                let axis_name = match axis {
                    TableAxis::Truth => "ground-truth category",
                    TableAxis::Cluster => "cluster label",
                };
                write!(
                    f,
                    "Contingency table {} '{}' has zero observations; chi-square is undefined.",
                    axis_name, level
                )
            }
            FaciesError::DegenerateTable(msg) => write!(f, "Degenerate contingency table: {}", msg),
            FaciesError::Artifact(msg) => write!(f, "Artifact I/O failed: {}", msg),
        }
    }
}

/// Reason a single mixture fit was discarded.
#[derive(Clone, Debug, PartialEq)]
pub enum FitFailure {
    /// A component covariance could not be factorized or is numerically singular.
    SingularCovariance { component: usize },
    /// A component lost (almost) all of its responsibility mass.
    EmptyComponent { component: usize },
    /// The log-likelihood became NaN or infinite.
    NonFiniteLikelihood,
    /// EM did not meet the tolerance within the iteration limit.
    NotConverged { iterations: usize },
}

impl fmt::Display for FitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitFailure::SingularCovariance { component } => {
                write!(f, "covariance of component {} is singular", component)
            }
            FitFailure::EmptyComponent { component } => {
                write!(f, "component {} has no responsibility mass", component)
            }
            FitFailure::NonFiniteLikelihood => write!(f, "log-likelihood is not finite"),
            FitFailure::NotConverged { iterations } => {
                write!(f, "EM did not converge within {} iterations", iterations)
            }
        }
    }
}

impl std::error::Error for FitFailure {}
