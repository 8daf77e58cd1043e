// src/pipeline.rs
//
// Configuration-driven orchestration: MCD -> robust PCA -> mixture and Ward
// clustering for every (PC count, cluster count) -> tables and artifacts.

use crate::artifacts::ArtifactStore;
use crate::error::{FaciesError, FaciesResult};
use crate::hierarchical::Dendrogram;
use crate::mcd::{self, McdConfig, RobustCovariance};
use crate::mixture::{MixtureConfig, RunAggregate, SubsampleRequest};
use crate::parallel::{run_parallel_fits, FanOutConfig};
use crate::pca::RobustPca;
use crate::tables::{ResultsTable, StatisticsTable};
use crate::validation::{validate_labels, ValidationStatistics};
use log::{info, warn};
use ndarray::ArrayView2;
use std::fmt::Display;

/// Full configuration of a classification run.
#[derive(Clone, Debug)]
pub struct ClassificationConfig {
    pub mcd: McdConfig,
    /// Leading principal components to cluster on, one configuration each.
    pub principal_component_counts: Vec<usize>,
    /// Cluster counts tried for every PC count, by both methods.
    pub cluster_counts: Vec<usize>,
    /// Fraction of rows drawn to initialize each mixture fit.
    pub subsample_fraction: f64,
    /// Total mixture fits per (PC count, cluster count), split over the workers.
    pub n_iter: usize,
    pub mixture: MixtureConfig,
    pub fan_out: FanOutConfig,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        ClassificationConfig {
            mcd: McdConfig::default(),
            principal_component_counts: vec![2, 3],
            cluster_counts: vec![2, 3, 4, 5],
            subsample_fraction: 0.75,
            n_iter: 1000,
            mixture: MixtureConfig::default(),
            fan_out: FanOutConfig::default(),
        }
    }
}

/// Mixture-clustering result of one configuration.
#[derive(Clone, Debug)]
pub struct MixtureRun {
    pub n_pcs: usize,
    pub n_clusters: usize,
    pub aggregate: RunAggregate,
}

/// Ward-clustering result of one configuration.
#[derive(Clone, Debug)]
pub struct WardRun {
    pub n_pcs: usize,
    pub n_clusters: usize,
    pub labels: Vec<usize>,
}

pub fn mixture_column_name(n_pcs: usize, n_clusters: usize) -> String {
    format!("mixture_{}PC_{}", n_pcs, n_clusters)
}

pub fn ward_column_name(n_pcs: usize, n_clusters: usize) -> String {
    format!("ward_{}PC_{}", n_pcs, n_clusters)
}

/// Everything a classification run produces.
#[derive(Clone, Debug)]
pub struct ClassificationOutput {
    pub robust_covariance: RobustCovariance,
    /// Full-rank robust PCA; configurations use prefixes of its scores.
    pub robust_pca: RobustPca,
    pub mixture_runs: Vec<MixtureRun>,
    pub ward_runs: Vec<WardRun>,
}

impl ClassificationOutput {
    pub fn mixture_run(&self, n_pcs: usize, n_clusters: usize) -> Option<&MixtureRun> {
        self.mixture_runs
            .iter()
            .find(|r| r.n_pcs == n_pcs && r.n_clusters == n_clusters)
    }

    pub fn ward_run(&self, n_pcs: usize, n_clusters: usize) -> Option<&WardRun> {
        self.ward_runs
            .iter()
            .find(|r| r.n_pcs == n_pcs && r.n_clusters == n_clusters)
    }

    /// Named label vectors: best-fit mixture labels first, then Ward labels.
    ///
    /// # Errors
    /// `AllFitsFailed` if any mixture configuration has no successful fit.
    pub fn label_columns(&self) -> FaciesResult<Vec<(String, Vec<usize>)>> {
        let mut columns = Vec::with_capacity(self.mixture_runs.len() + self.ward_runs.len());
        for run in &self.mixture_runs {
            let best = run.aggregate.best_fit()?;
            columns.push((mixture_column_name(run.n_pcs, run.n_clusters), best.labels.clone()));
        }
        for run in &self.ward_runs {
            columns.push((ward_column_name(run.n_pcs, run.n_clusters), run.labels.clone()));
        }
        Ok(columns)
    }

    /// Combined per-observation table keyed by `depth`, in original row order.
    pub fn results_table(&self, depth: &[f64]) -> FaciesResult<ResultsTable> {
        let mut table = ResultsTable::new(depth.to_vec());
        for (name, labels) in self.label_columns()? {
            table.add_column(&name, labels)?;
        }
        Ok(table)
    }

    /// Chi-square / Cramér's V of every clustering column against `truth`.
    pub fn statistics_table<T>(&self, truth: &[Option<T>]) -> FaciesResult<StatisticsTable>
    where
        T: Ord + Clone + Display,
    {
        self.label_columns()?
            .into_iter()
            .map(|(name, labels)| -> FaciesResult<(String, ValidationStatistics)> {
                Ok((name, validate_labels(truth, &labels)?))
            })
            .collect()
    }

    /// Persists one robust-PCA artifact per PC count and one aggregate per mixture configuration.
    pub fn save_artifacts(&self, store: &ArtifactStore) -> FaciesResult<()> {
        let mut saved_pcs: Vec<usize> = Vec::new();
        for run in &self.mixture_runs {
            if !saved_pcs.contains(&run.n_pcs) {
                store.save_robust_pca(&self.robust_pca, run.n_pcs)?;
                saved_pcs.push(run.n_pcs);
            }
            store.save_mixture_run(run.n_pcs, &run.aggregate)?;
        }
        info!("Saved artifacts for run '{}'.", store.run_id());
        Ok(())
    }
}

/// Runs the whole classification for one observation matrix.
#[derive(Clone, Debug, Default)]
pub struct FaciesClassifier {
    config: ClassificationConfig,
}

impl FaciesClassifier {
    pub fn new(config: ClassificationConfig) -> Self {
        FaciesClassifier { config }
    }

    pub fn config(&self) -> &ClassificationConfig {
        &self.config
    }

    fn validate(&self, observations: ArrayView2<f64>) -> FaciesResult<()> {
        let p = observations.ncols();
        let config = &self.config;
        if config.principal_component_counts.is_empty() || config.cluster_counts.is_empty() {
            return Err(FaciesError::InvalidInput(
                "At least one PC count and one cluster count are required.".into(),
            ));
        }
        if let Some(&bad) = config.principal_component_counts.iter().find(|&&k| k == 0 || k > p) {
            return Err(FaciesError::InvalidInput(format!(
                "PC count {} must lie in [1, {}].",
                bad, p
            )));
        }
        if let Some(&bad) = config.cluster_counts.iter().find(|&&k| k == 0) {
            return Err(FaciesError::InvalidInput(format!("Cluster count {} must be positive.", bad)));
        }
        Ok(())
    }

    /// Classifies the rows of `observations` (n samples × p variables, downcore order).
    ///
    /// # Errors
    /// Input errors from any stage, `SingularCovariance` / `Decomposition` from the
    /// robust PCA. All-failed mixture runs are kept in the output and surface when
    /// their best fit is requested.
    pub fn classify(&self, observations: ArrayView2<f64>) -> FaciesResult<ClassificationOutput> {
        self.validate(observations)?;
        let overall_start_time = std::time::Instant::now();
        let n = observations.nrows();

        let robust_covariance = mcd::estimate(observations, &self.config.mcd)?;
        let robust_pca = RobustPca::fit(observations, &robust_covariance)?;
        info!(
            "Robust PCA explained variance ratio: {:?}",
            robust_pca.explained_variance_ratio()
        );

        let mut mixture_runs = Vec::new();
        let mut ward_runs = Vec::new();
        for &n_pcs in &self.config.principal_component_counts {
            let projected = robust_pca.scores_prefix(n_pcs)?;
            let dendrogram = Dendrogram::ward(projected)?;

            for &n_clusters in &self.config.cluster_counts {
                let request = SubsampleRequest::from_fraction(
                    n,
                    self.config.subsample_fraction,
                    n_clusters,
                    self.config.n_iter,
                )?;
                let aggregate = run_parallel_fits(projected, &request, &self.config.mixture, &self.config.fan_out)?;
                if aggregate.best().is_none() {
                    warn!(
                        "Mixture configuration {} produced no successful fit.",
                        mixture_column_name(n_pcs, n_clusters)
                    );
                }
                mixture_runs.push(MixtureRun { n_pcs, n_clusters, aggregate });

                ward_runs.push(WardRun {
                    n_pcs,
                    n_clusters,
                    labels: dendrogram.cut(n_clusters)?,
                });
            }
        }

        info!(
            "Classification of {} rows completed in {:?}.",
            n,
            overall_start_time.elapsed()
        );
        Ok(ClassificationOutput {
            robust_covariance,
            robust_pca,
            mixture_runs,
            ward_runs,
        })
    }
}
