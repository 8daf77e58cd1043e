// src/mixture.rs
//
// Gaussian mixture clustering with full (VVV) covariances, fitted repeatedly
// from random subsamples.

use crate::error::{FaciesError, FaciesResult, FitFailure};
use crate::hierarchical::ward_labels;
use crate::linalg_backends::{symmetrize, CholeskyFactor};
use log::{debug, trace, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

const LN_2PI: f64 = 1.8378770664093453;

/// EM settings shared by every fit of a run.
#[derive(Clone, Debug)]
pub struct MixtureConfig {
    /// EM iterations allowed per stage before the fit counts as not converged.
    pub max_iterations: usize,
    /// Relative log-likelihood change treated as convergence.
    pub tolerance: f64,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        MixtureConfig {
            max_iterations: 1000,
            tolerance: 1e-5,
        }
    }
}

/// Fitted mixture parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixtureParameters {
    /// Mixing proportions. Shape: (n_pdfs)
    pub weights: Array1<f64>,
    /// Component means as rows. Shape: (n_pdfs, n_dims)
    pub means: Array2<f64>,
    /// One (n_dims, n_dims) covariance per component.
    pub covariances: Vec<Array2<f64>>,
}

/// Outcome of one successful mixture fit.
///
/// `labels` holds one entry per row of the fitted matrix, in row order, with
/// values in `[1, n_pdfs]`. Which integer denotes which grouping is arbitrary
/// and differs between fits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterFitResult {
    pub n_pdfs: usize,
    pub labels: Vec<usize>,
    pub log_likelihood: f64,
    /// `2 * log_likelihood - n_parameters * ln(n_rows)`.
    pub bic: f64,
    /// EM iterations on the full data.
    pub em_iterations: usize,
    pub parameters: MixtureParameters,
}

/// Tagged per-iteration result: a fit, or the numerical reason it was discarded.
pub type FitOutcome = Result<ClusterFitResult, FitFailure>;

/// Number of free parameters of a VVV mixture with `k` components in `d` dimensions.
pub fn free_parameter_count(k: usize, d: usize) -> usize {
    (k - 1) + k * d + k * d * (d + 1) / 2
}

struct EmState {
    parameters: MixtureParameters,
    responsibilities: Array2<f64>,
    log_likelihood: f64,
    iterations: usize,
}

/// Gaussian mixture model with unconstrained per-component covariance.
#[derive(Clone, Debug)]
pub struct GaussianMixture {
    n_components: usize,
    config: MixtureConfig,
}

impl GaussianMixture {
    pub fn new(n_components: usize, config: MixtureConfig) -> Self {
        GaussianMixture { n_components, config }
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Fits the mixture to all rows of `data`, initialized from the rows in `subset` only.
    ///
    /// The subset is partitioned by Euclidean Ward clustering, EM is run to convergence on
    /// the subset, and the resulting parameters start EM on the full data.
    ///
    /// The outer `Result` carries fatal input errors; the inner [`FitOutcome`]
    /// carries per-fit numerical failures.
    pub fn fit_from_subset(&self, data: ArrayView2<f64>, subset: &[usize]) -> FaciesResult<FitOutcome> {
        let n = data.nrows();
        if self.n_components == 0 {
            return Err(FaciesError::InvalidInput("Mixture needs at least one component.".into()));
        }
        if subset.len() < self.n_components {
            return Err(FaciesError::InvalidInput(format!(
                "Subset of {} rows cannot initialize {} components.",
                subset.len(),
                self.n_components
            )));
        }
        if let Some(&bad) = subset.iter().find(|&&row| row >= n) {
            return Err(FaciesError::InvalidInput(format!(
                "Subset row {} is out of range for {} rows.",
                bad, n
            )));
        }

        let subset_data = data.select(Axis(0), subset);
        let initial_labels = ward_labels(subset_data.view(), self.n_components)?;
        Ok(self.fit_from_partition(data, subset_data.view(), &initial_labels))
    }

    fn fit_from_partition(
        &self,
        data: ArrayView2<f64>,
        subset_data: ArrayView2<f64>,
        initial_labels: &[usize],
    ) -> FitOutcome {
        let mut hard = Array2::<f64>::zeros((subset_data.nrows(), self.n_components));
        for (row, &label) in initial_labels.iter().enumerate() {
            hard[[row, label - 1]] = 1.0;
        }
        let subset_start = m_step(subset_data, &hard)?;
        let subset_fit = self.run_em(subset_data, subset_start)?;
        let full_fit = self.run_em(data, subset_fit.parameters)?;

        let labels = full_fit
            .responsibilities
            .outer_iter()
            .map(|row| {
                let mut best = 0usize;
                for (c, &r) in row.iter().enumerate() {
                    if r > row[best] {
                        best = c;
                    }
                }
                best + 1
            })
            .collect();

        let n_params = free_parameter_count(self.n_components, data.ncols()) as f64;
        let bic = 2.0 * full_fit.log_likelihood - n_params * (data.nrows() as f64).ln();
        Ok(ClusterFitResult {
            n_pdfs: self.n_components,
            labels,
            log_likelihood: full_fit.log_likelihood,
            bic,
            em_iterations: full_fit.iterations,
            parameters: full_fit.parameters,
        })
    }

    fn run_em(&self, data: ArrayView2<f64>, initial: MixtureParameters) -> Result<EmState, FitFailure> {
        let (mut responsibilities, mut log_likelihood) = e_step(data, &initial)?;
        for iteration in 1..=self.config.max_iterations {
            let parameters = m_step(data, &responsibilities)?;
            let (next_resp, next_ll) = e_step(data, &parameters)?;
            let converged = (next_ll - log_likelihood).abs() <= self.config.tolerance * (1.0 + next_ll.abs());
            responsibilities = next_resp;
            log_likelihood = next_ll;
            if converged {
                return Ok(EmState {
                    parameters,
                    responsibilities,
                    log_likelihood,
                    iterations: iteration,
                });
            }
        }
        Err(FitFailure::NotConverged {
            iterations: self.config.max_iterations,
        })
    }
}

/// Maximization step: weighted means and covariances from responsibilities.
fn m_step(data: ArrayView2<f64>, responsibilities: &Array2<f64>) -> Result<MixtureParameters, FitFailure> {
    let n = data.nrows() as f64;
    let mass = responsibilities.sum_axis(Axis(0));
    if let Some(component) = mass.iter().position(|&m| !(m > f64::EPSILON * n)) {
        return Err(FitFailure::EmptyComponent { component });
    }

    let mut means = responsibilities.t().dot(&data);
    let mut covariances = Vec::with_capacity(mass.len());
    for (c, &m) in mass.iter().enumerate() {
        let mut mean = means.row_mut(c);
        mean /= m;
        let centered = &data - &mean;
        let weighted = &centered * &responsibilities.column(c).insert_axis(Axis(1));
        let mut covariance = weighted.t().dot(&centered);
        covariance /= m;
        symmetrize(&mut covariance);
        covariances.push(covariance);
    }
    Ok(MixtureParameters {
        weights: mass / n,
        means,
        covariances,
    })
}

/// Expectation step: posterior responsibilities and total log-likelihood.
fn e_step(data: ArrayView2<f64>, parameters: &MixtureParameters) -> Result<(Array2<f64>, f64), FitFailure> {
    let (n, d) = data.dim();
    let k = parameters.weights.len();
    let mut log_density = Array2::<f64>::zeros((n, k));

    for c in 0..k {
        let factor = CholeskyFactor::factorize(&parameters.covariances[c])
            .map_err(|_| FitFailure::SingularCovariance { component: c })?;
        let log_norm = parameters.weights[c].ln() - 0.5 * (d as f64 * LN_2PI + factor.log_determinant());
        let mean = parameters.means.row(c);
        for (i, row) in data.outer_iter().enumerate() {
            let centered = &row - &mean;
            log_density[[i, c]] = log_norm - 0.5 * factor.mahalanobis_squared(centered.view());
        }
    }

    let mut log_likelihood = 0.0;
    for mut row in log_density.outer_iter_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let log_sum = max + row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln();
        log_likelihood += log_sum;
        row.mapv_inplace(|v| (v - log_sum).exp());
    }
    if !log_likelihood.is_finite() {
        return Err(FitFailure::NonFiniteLikelihood);
    }
    Ok((log_density, log_likelihood))
}

/// Parameters of one repeated-subsample run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubsampleRequest {
    /// Number of mixture components.
    pub n_pdfs: usize,
    /// Rows drawn (without replacement) to initialize each fit.
    pub sample_size: usize,
    /// Number of fits to attempt.
    pub n_iter: usize,
}

impl SubsampleRequest {
    /// Request whose sample size is `floor(fraction * n_rows)`.
    pub fn from_fraction(n_rows: usize, fraction: f64, n_pdfs: usize, n_iter: usize) -> FaciesResult<Self> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(FaciesError::InvalidInput(format!(
                "Subsample fraction must lie in (0, 1], got {}.",
                fraction
            )));
        }
        Ok(SubsampleRequest {
            n_pdfs,
            sample_size: (fraction * n_rows as f64).floor() as usize,
            n_iter,
        })
    }

    pub(crate) fn validate(&self, data: ArrayView2<f64>) -> FaciesResult<()> {
        let (n, d) = data.dim();
        if n == 0 || d == 0 {
            return Err(FaciesError::InvalidInput(
                "Projected matrix has zero rows or zero columns.".into(),
            ));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(FaciesError::InvalidInput(
                "Projected matrix contains non-finite values.".into(),
            ));
        }
        if self.n_pdfs == 0 {
            return Err(FaciesError::InvalidInput("n_pdfs must be at least 1.".into()));
        }
        if self.sample_size > n {
            return Err(FaciesError::InvalidInput(format!(
                "Subsample size {} exceeds the {} available rows.",
                self.sample_size, n
            )));
        }
        if self.sample_size < self.n_pdfs {
            return Err(FaciesError::InvalidInput(format!(
                "Subsample size {} is smaller than n_pdfs {}.",
                self.sample_size, self.n_pdfs
            )));
        }
        Ok(())
    }
}

/// Likelihood history and extreme fits of a run.
///
/// `best` and `worst` are `None` exactly when no fit succeeded; use
/// [`RunAggregate::best_fit`] to get that case as an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunAggregate {
    n_pdfs: usize,
    log_likelihoods: Vec<f64>,
    best: Option<ClusterFitResult>,
    worst: Option<ClusterFitResult>,
    n_errors: usize,
}

impl RunAggregate {
    pub fn n_pdfs(&self) -> usize {
        self.n_pdfs
    }

    pub fn log_likelihoods(&self) -> &[f64] {
        &self.log_likelihoods
    }

    pub fn n_errors(&self) -> usize {
        self.n_errors
    }

    /// Successful plus failed fits.
    pub fn attempted(&self) -> usize {
        self.log_likelihoods.len() + self.n_errors
    }

    pub fn best(&self) -> Option<&ClusterFitResult> {
        self.best.as_ref()
    }

    pub fn worst(&self) -> Option<&ClusterFitResult> {
        self.worst.as_ref()
    }

    /// The maximum-likelihood fit, or `AllFitsFailed`.
    pub fn best_fit(&self) -> FaciesResult<&ClusterFitResult> {
        self.best
            .as_ref()
            .ok_or(FaciesError::AllFitsFailed { attempted: self.attempted() })
    }

    /// The minimum-likelihood fit, or `AllFitsFailed`.
    pub fn worst_fit(&self) -> FaciesResult<&ClusterFitResult> {
        self.worst
            .as_ref()
            .ok_or(FaciesError::AllFitsFailed { attempted: self.attempted() })
    }
}

/// Accumulates fit outcomes into a [`RunAggregate`].
///
/// Extremes are replaced only on strictly better likelihoods, so the first
/// recorded fit wins ties.
#[derive(Clone, Debug)]
pub struct RunAccumulator {
    aggregate: RunAggregate,
}

impl RunAccumulator {
    pub fn new(n_pdfs: usize) -> Self {
        RunAccumulator {
            aggregate: RunAggregate {
                n_pdfs,
                log_likelihoods: Vec::new(),
                best: None,
                worst: None,
                n_errors: 0,
            },
        }
    }

    pub fn record(&mut self, outcome: FitOutcome) {
        match outcome {
            Ok(fit) => {
                self.aggregate.log_likelihoods.push(fit.log_likelihood);
                self.offer_worst(&fit);
                self.offer_best(fit);
            }
            Err(_) => self.aggregate.n_errors += 1,
        }
    }

    /// Merges a partial aggregate: appends its history, sums its failures and
    /// compares its extremes against the current ones.
    pub fn absorb(&mut self, part: RunAggregate) -> FaciesResult<()> {
        if part.n_pdfs != self.aggregate.n_pdfs {
            return Err(FaciesError::InvalidInput(format!(
                "Cannot merge a {}-component run into a {}-component run.",
                part.n_pdfs, self.aggregate.n_pdfs
            )));
        }
        self.aggregate.log_likelihoods.extend(part.log_likelihoods);
        self.aggregate.n_errors += part.n_errors;
        if let Some(worst) = part.worst {
            self.offer_worst(&worst);
        }
        if let Some(best) = part.best {
            self.offer_best(best);
        }
        Ok(())
    }

    fn offer_best(&mut self, fit: ClusterFitResult) {
        let improves = self
            .aggregate
            .best
            .as_ref()
            .map_or(true, |b| fit.log_likelihood > b.log_likelihood);
        if improves {
            self.aggregate.best = Some(fit);
        }
    }

    fn offer_worst(&mut self, fit: &ClusterFitResult) {
        let lowers = self
            .aggregate
            .worst
            .as_ref()
            .map_or(true, |w| fit.log_likelihood < w.log_likelihood);
        if lowers {
            self.aggregate.worst = Some(fit.clone());
        }
    }

    pub fn finish(self) -> RunAggregate {
        self.aggregate
    }
}

/// Runs `request.n_iter` mixture fits, each initialized from an independent
/// random subsample drawn from `rng`, and aggregates the outcomes.
///
/// Numerical failures are counted in `n_errors`; they never abort the run.
///
/// # Errors
/// Returns `InvalidInput` for an empty or non-finite matrix, `n_pdfs == 0`,
/// or a sample size larger than the row count or smaller than `n_pdfs`.
pub fn run_subsample_fits<R: Rng + ?Sized>(
    data: ArrayView2<f64>,
    request: &SubsampleRequest,
    config: &MixtureConfig,
    rng: &mut R,
) -> FaciesResult<RunAggregate> {
    request.validate(data)?;
    let mixture = GaussianMixture::new(request.n_pdfs, config.clone());
    let mut accumulator = RunAccumulator::new(request.n_pdfs);

    for iteration in 0..request.n_iter {
        let subset = index::sample(rng, data.nrows(), request.sample_size).into_vec();
        let outcome = mixture.fit_from_subset(data, &subset)?;
        if let Err(failure) = &outcome {
            trace!("Mixture fit {} (G={}) discarded: {}", iteration, request.n_pdfs, failure);
        }
        accumulator.record(outcome);
    }

    let aggregate = accumulator.finish();
    if aggregate.best().is_none() && request.n_iter > 0 {
        warn!(
            "All {} mixture fits with G={} failed.",
            request.n_iter, request.n_pdfs
        );
    } else {
        debug!(
            "Mixture run G={}: {} fits, {} failures.",
            request.n_pdfs,
            aggregate.log_likelihoods().len(),
            aggregate.n_errors()
        );
    }
    Ok(aggregate)
}
