// src/validation.rs
//
// Association between cluster labels and observed lithologic facies.

use crate::error::{FaciesError, FaciesResult, TableAxis};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Ground-truth category × cluster label counts.
#[derive(Clone, Debug, PartialEq)]
pub struct ContingencyTable {
    truth_levels: Vec<String>,
    cluster_levels: Vec<usize>,
    /// Shape: (truth_levels, cluster_levels)
    counts: Array2<u64>,
}

/// Pearson chi-square test of independence and Cramér's V.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatistics {
    pub chi_square: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
    /// Cramér's V in `[0, 1]`.
    pub cramers_v: f64,
    /// Rows with an observed ground-truth category.
    pub n_observations: u64,
}

impl ContingencyTable {
    /// Tabulates observed levels of both label vectors.
    ///
    /// Rows whose ground truth is `None` are skipped. Levels appear in sorted order.
    pub fn from_labels<T>(truth: &[Option<T>], clusters: &[usize]) -> FaciesResult<Self>
    where
        T: Ord + Clone + Display,
    {
        if truth.len() != clusters.len() {
            return Err(FaciesError::InvalidInput(format!(
                "Ground truth has {} rows but cluster labels have {}.",
                truth.len(),
                clusters.len()
            )));
        }
        let mut pair_counts: BTreeMap<(&T, usize), u64> = BTreeMap::new();
        let mut truth_set: BTreeMap<&T, usize> = BTreeMap::new();
        let mut cluster_set: BTreeMap<usize, usize> = BTreeMap::new();
        for (category, &cluster) in truth.iter().zip(clusters) {
            if let Some(category) = category {
                *pair_counts.entry((category, cluster)).or_insert(0) += 1;
                truth_set.insert(category, 0);
                cluster_set.insert(cluster, 0);
            }
        }
        if pair_counts.is_empty() {
            return Err(FaciesError::DegenerateTable(
                "No rows carry a ground-truth category.".into(),
            ));
        }
        for (position, index) in truth_set.values_mut().enumerate() {
            *index = position;
        }
        for (position, index) in cluster_set.values_mut().enumerate() {
            *index = position;
        }

        let mut counts = Array2::<u64>::zeros((truth_set.len(), cluster_set.len()));
        for ((category, cluster), count) in &pair_counts {
            counts[[truth_set[category], cluster_set[cluster]]] = *count;
        }
        Ok(ContingencyTable {
            truth_levels: truth_set.keys().map(|t| t.to_string()).collect(),
            cluster_levels: cluster_set.keys().copied().collect(),
            counts,
        })
    }

    /// A table over explicit level sets, which may include levels with no observations.
    pub fn from_counts(
        truth_levels: Vec<String>,
        cluster_levels: Vec<usize>,
        counts: Array2<u64>,
    ) -> FaciesResult<Self> {
        if counts.dim() != (truth_levels.len(), cluster_levels.len()) {
            return Err(FaciesError::InvalidInput(format!(
                "Counts shape {:?} does not match {} truth levels x {} cluster levels.",
                counts.dim(),
                truth_levels.len(),
                cluster_levels.len()
            )));
        }
        Ok(ContingencyTable { truth_levels, cluster_levels, counts })
    }

    pub fn truth_levels(&self) -> &[String] {
        &self.truth_levels
    }

    pub fn cluster_levels(&self) -> &[usize] {
        &self.cluster_levels
    }

    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.sum()
    }

    /// Pearson chi-square statistic, its p-value and Cramér's V.
    ///
    /// # Errors
    /// - `EmptyMargin` if any truth category or cluster label has zero count,
    ///   since its expected frequencies are zero and the statistic is undefined.
    /// - `DegenerateTable` if either axis has fewer than two levels (no degrees
    ///   of freedom, Cramér's V undefined).
    pub fn chi_square_test(&self) -> FaciesResult<ValidationStatistics> {
        let row_totals: Array1<f64> = self.counts.sum_axis(Axis(1)).mapv(|v| v as f64);
        let col_totals: Array1<f64> = self.counts.sum_axis(Axis(0)).mapv(|v| v as f64);
        if let Some(i) = row_totals.iter().position(|&t| t == 0.0) {
            return Err(FaciesError::EmptyMargin {
                axis: TableAxis::Truth,
                level: self.truth_levels[i].clone(),
            });
        }
        if let Some(j) = col_totals.iter().position(|&t| t == 0.0) {
            return Err(FaciesError::EmptyMargin {
                axis: TableAxis::Cluster,
                level: self.cluster_levels[j].to_string(),
            });
        }
        let (r, c) = self.counts.dim();
        if r < 2 || c < 2 {
            return Err(FaciesError::DegenerateTable(format!(
                "{} ground-truth categories x {} clusters leaves no degrees of freedom.",
                r, c
            )));
        }

        let total = self.total() as f64;
        let mut chi_square = 0.0;
        for i in 0..r {
            for j in 0..c {
                let expected = row_totals[i] * col_totals[j] / total;
                let diff = self.counts[[i, j]] as f64 - expected;
                chi_square += diff * diff / expected;
            }
        }
        let degrees_of_freedom = (r - 1) * (c - 1);
        let p_value = ChiSquared::new(degrees_of_freedom as f64)
            .map_err(|e| FaciesError::DegenerateTable(format!("chi-square distribution unavailable: {}", e)))?
            .sf(chi_square);
        let cramers_v = (chi_square / (total * (r.min(c) - 1) as f64)).sqrt().clamp(0.0, 1.0);

        Ok(ValidationStatistics {
            chi_square,
            degrees_of_freedom,
            p_value,
            cramers_v,
            n_observations: self.total(),
        })
    }
}

/// Tabulates `clusters` against `truth` and runs the chi-square test.
pub fn validate_labels<T>(truth: &[Option<T>], clusters: &[usize]) -> FaciesResult<ValidationStatistics>
where
    T: Ord + Clone + Display,
{
    ContingencyTable::from_labels(truth, clusters)?.chi_square_test()
}

/// Evaluates several named clusterings against the same ground truth, in the given order.
pub fn validate_clusterings<T, S>(
    truth: &[Option<T>],
    candidates: &[(S, Vec<usize>)],
) -> FaciesResult<Vec<(String, ValidationStatistics)>>
where
    T: Ord + Clone + Display,
    S: AsRef<str>,
{
    candidates
        .iter()
        .map(|(name, labels)| -> FaciesResult<(String, ValidationStatistics)> {
            Ok((name.as_ref().to_string(), validate_labels(truth, labels)?))
        })
        .collect()
}
