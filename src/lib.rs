// Robust PCA and mixture-model classification of downcore sediment data

//! Unsupervised facies classification of drill-core measurements.
//!
//! The observation matrix (one row per downcore sample, one column per
//! transformed geochemical or physical variable) is reduced to robust principal
//! components using a minimum covariance determinant estimate, then clustered
//! two ways:
//!
//! - a full-covariance Gaussian mixture fitted many times from random
//!   subsamples on a worker pool, keeping the best and worst fits by
//!   log-likelihood and counting numerically failed fits;
//! - Ward agglomerative clustering cut at a requested cluster count.
//!
//! Label vectors are validated against observed lithology with a Pearson
//! chi-square test and Cramér's V.
//!
//! ```no_run
//! use facies_cluster::{ClassificationConfig, FaciesClassifier};
//! use ndarray::Array2;
//!
//! let observations: Array2<f64> = Array2::zeros((200, 4)); // load real data here
//! let classifier = FaciesClassifier::new(ClassificationConfig::default());
//! let output = classifier.classify(observations.view()).unwrap();
//! let depth: Vec<f64> = (0..200).map(|i| i as f64 * 0.01).collect();
//! let table = output.results_table(&depth).unwrap();
//! table.save_tsv("clusters.tsv").unwrap();
//! ```

pub mod artifacts;
pub mod error;
pub mod hierarchical;
pub mod linalg_backends;
pub mod mcd;
pub mod mixture;
pub mod parallel;
pub mod pca;
pub mod pipeline;
pub mod tables;
pub mod validation;

pub use artifacts::ArtifactStore;
pub use error::{FaciesError, FaciesResult, FitFailure, TableAxis};
pub use hierarchical::{ward_labels, Dendrogram, Merge};
pub use mcd::{McdConfig, RobustCovariance};
pub use mixture::{
    run_subsample_fits, ClusterFitResult, FitOutcome, GaussianMixture, MixtureConfig, MixtureParameters,
    RunAccumulator, RunAggregate, SubsampleRequest,
};
pub use parallel::{iteration_shares, run_parallel_fits, FanOutConfig};
pub use pca::RobustPca;
pub use pipeline::{ClassificationConfig, ClassificationOutput, FaciesClassifier, MixtureRun, WardRun};
pub use tables::{ResultsTable, StatisticsTable};
pub use validation::{validate_clusterings, validate_labels, ContingencyTable, ValidationStatistics};

#[cfg(test)]
mod test_data;
#[cfg(test)]
mod parallel_tests;
#[cfg(test)]
mod hierarchical_tests;
