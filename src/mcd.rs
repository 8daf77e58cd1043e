// src/mcd.rs
//
// Minimum covariance determinant (FAST-MCD) estimate of location and scatter.

use crate::error::{FaciesError, FaciesResult};
use crate::linalg_backends::{symmetrize, CholeskyFactor};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Quantile of the chi-square distribution used to flag outliers in the reweighting step.
const REWEIGHT_QUANTILE: f64 = 0.975;

/// Configuration for the minimum covariance determinant estimator.
#[derive(Clone, Debug)]
pub struct McdConfig {
    /// Fraction of rows to retain, in the open interval (0, 1).
    /// 0.98 keeps 98% of the rows and trims the 2% most outlying.
    pub alpha: f64,
    /// Number of random (p+1)-row starting subsets.
    pub num_starts: usize,
    /// Number of lowest-determinant starts iterated to convergence.
    pub num_candidates: usize,
    /// Upper bound on concentration steps per candidate.
    pub max_c_steps: usize,
    /// Apply the one-step reweighting after the raw estimate.
    pub reweight: bool,
    /// Seed of the ChaCha stream drawing starting subsets.
    pub seed: u64,
}

impl Default for McdConfig {
    fn default() -> Self {
        McdConfig {
            alpha: 0.98,
            num_starts: 500,
            num_candidates: 10,
            max_c_steps: 100,
            reweight: true,
            seed: 2025,
        }
    }
}

/// Robust location and scatter of an observation matrix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RobustCovariance {
    /// Final (reweighted when enabled) center. Shape: (p)
    center: Array1<f64>,
    /// Final (reweighted when enabled) covariance. Shape: (p, p)
    covariance: Array2<f64>,
    /// Mean of the minimum-determinant h-subset.
    raw_center: Array1<f64>,
    /// Consistency-corrected covariance of the h-subset.
    raw_covariance: Array2<f64>,
    /// Log-determinant of the uncorrected h-subset covariance.
    raw_log_determinant: f64,
    /// Membership of each row in the retained h-subset.
    support: Vec<bool>,
    /// Squared Mahalanobis distance of each row under the final estimate.
    mahalanobis: Array1<f64>,
    /// Number of retained rows.
    h: usize,
}

impl RobustCovariance {
    pub fn center(&self) -> &Array1<f64> {
        &self.center
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn raw_center(&self) -> &Array1<f64> {
        &self.raw_center
    }

    pub fn raw_covariance(&self) -> &Array2<f64> {
        &self.raw_covariance
    }

    pub fn raw_log_determinant(&self) -> f64 {
        self.raw_log_determinant
    }

    pub fn support(&self) -> &[bool] {
        &self.support
    }

    pub fn mahalanobis(&self) -> &Array1<f64> {
        &self.mahalanobis
    }

    pub fn retained(&self) -> usize {
        self.h
    }
}

/// Number of rows the estimator retains for `n` rows in `p` dimensions.
///
/// `h = floor(2*n2 - n + 2*(n - n2)*alpha)` with `n2 = floor((n + p + 1) / 2)`,
/// so `alpha = 0.5` gives the maximal-breakdown subset size and `alpha -> 1` tends to `n`.
///
/// The formula is designed for `alpha` in `[0.5, 1)`. Smaller values are accepted and keep
/// interpolating linearly below `n2`, so the count is `alpha * n` plus roughly `(1 - alpha) * (p + 1)`
/// rather than exactly `alpha * n` (e.g. 13 rows for `n = 100, p = 3, alpha = 0.1`), and the
/// estimate then trades breakdown point for fewer retained rows.
pub fn retained_count(n: usize, p: usize, alpha: f64) -> usize {
    let n2 = (n + p + 1) / 2;
    let h = (2.0 * n2 as f64 - n as f64 + 2.0 * (n as f64 - n2 as f64) * alpha).floor();
    if h <= 0.0 {
        0
    } else {
        (h as usize).min(n)
    }
}

/// h-subset estimate together with its factorization.
struct Candidate {
    rows: Vec<usize>,
    center: Array1<f64>,
    covariance: Array2<f64>,
    factor: CholeskyFactor,
}

impl Candidate {
    fn from_rows(data: ArrayView2<f64>, mut rows: Vec<usize>) -> FaciesResult<Self> {
        rows.sort_unstable();
        let (center, covariance) = mean_and_covariance(data, &rows)?;
        let factor = CholeskyFactor::factorize(&covariance)?;
        Ok(Candidate { rows, center, covariance, factor })
    }

    fn log_determinant(&self) -> f64 {
        self.factor.log_determinant()
    }

    /// Concentration step: refit on the `h` rows closest under the current estimate.
    fn concentrate(&self, data: ArrayView2<f64>, h: usize) -> FaciesResult<Candidate> {
        let distances = squared_distances(data, &self.center, &self.factor);
        Candidate::from_rows(data, closest_rows(&distances, h))
    }
}

/// Mean and (n-1)-divisor covariance of the selected rows.
pub(crate) fn mean_and_covariance(
    data: ArrayView2<f64>,
    rows: &[usize],
) -> FaciesResult<(Array1<f64>, Array2<f64>)> {
    if rows.len() < 2 {
        return Err(FaciesError::InsufficientData {
            rows: rows.len(),
            columns: data.ncols(),
            required: 2,
        });
    }
    let subset = data.select(Axis(0), rows);
    let center = subset
        .mean_axis(Axis(0))
        .ok_or_else(|| FaciesError::InvalidInput("Failed to compute subset mean.".into()))?;
    let centered = &subset - &center;
    let mut covariance = centered.t().dot(&centered);
    covariance /= (rows.len() - 1) as f64;
    symmetrize(&mut covariance);
    Ok((center, covariance))
}

fn squared_distances(data: ArrayView2<f64>, center: &Array1<f64>, factor: &CholeskyFactor) -> Array1<f64> {
    data.outer_iter()
        .map(|row| {
            let centered = &row - center;
            factor.mahalanobis_squared(centered.view())
        })
        .collect()
}

/// Indices of the `h` smallest distances, ties resolved by row order.
fn closest_rows(distances: &Array1<f64>, h: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..distances.len()).collect();
    order.sort_by(|&a, &b| {
        distances[a]
            .partial_cmp(&distances[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(h);
    order
}

/// `(q / n) / F_{chi2(p+2)}(F^{-1}_{chi2(p)}(q / n))`, the factor making the
/// covariance of a trimmed normal sample consistent.
fn consistency_factor(p: usize, fraction: f64) -> FaciesResult<f64> {
    if fraction >= 1.0 {
        return Ok(1.0);
    }
    let chi_p = ChiSquared::new(p as f64)
        .map_err(|e| FaciesError::InvalidInput(format!("chi-square({}) unavailable: {}", p, e)))?;
    let chi_p2 = ChiSquared::new(p as f64 + 2.0)
        .map_err(|e| FaciesError::InvalidInput(format!("chi-square({}) unavailable: {}", p + 2, e)))?;
    let quantile = chi_p.inverse_cdf(fraction);
    let mass = chi_p2.cdf(quantile);
    if !(mass > 0.0) {
        return Err(FaciesError::SingularCovariance(format!(
            "Consistency factor undefined for retained fraction {}.",
            fraction
        )));
    }
    Ok(fraction / mass)
}

fn validate_input(data: ArrayView2<f64>, config: &McdConfig) -> FaciesResult<usize> {
    let (n, p) = data.dim();
    if !(config.alpha > 0.0 && config.alpha < 1.0) {
        return Err(FaciesError::InvalidInput(format!(
            "MCD retain fraction alpha must lie in (0, 1), got {}.",
            config.alpha
        )));
    }
    if p == 0 {
        return Err(FaciesError::InvalidInput("Observation matrix has zero columns.".into()));
    }
    if n <= p {
        return Err(FaciesError::InsufficientData { rows: n, columns: p, required: p + 1 });
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(FaciesError::InvalidInput(
            "Observation matrix contains non-finite values.".into(),
        ));
    }
    if config.num_starts == 0 || config.num_candidates == 0 {
        return Err(FaciesError::InvalidInput(
            "MCD needs at least one start and one candidate.".into(),
        ));
    }
    let h = retained_count(n, p, config.alpha);
    if h <= p {
        return Err(FaciesError::InsufficientData {
            rows: n,
            columns: p,
            required: p + 1,
        });
    }
    Ok(h)
}

/// Draws a (p+1)-row start and grows it with random further rows until its covariance is non-singular.
fn random_start(data: ArrayView2<f64>, rng: &mut ChaCha8Rng) -> Option<Candidate> {
    let (n, p) = data.dim();
    let mut rows = index::sample(rng, n, p + 1).into_vec();
    let mut selected = vec![false; n];
    for &row in &rows {
        selected[row] = true;
    }
    loop {
        match Candidate::from_rows(data, rows.clone()) {
            Ok(candidate) => return Some(candidate),
            Err(_) if rows.len() < n => {
                let pick = rng.gen_range(0..n - rows.len());
                let next = (0..n).filter(|&r| !selected[r]).nth(pick)?;
                selected[next] = true;
                rows.push(next);
            }
            Err(_) => return None,
        }
    }
}

/// Estimates a robust center and covariance by the minimum covariance determinant.
///
/// # Errors
/// - `InvalidInput` if `alpha` is outside (0, 1), the matrix has no columns or non-finite values.
/// - `InsufficientData` if `n <= p` or the retained subset would have `h <= p` rows.
/// - `SingularCovariance` if the covariance of all rows is singular (exact fit; every
///   h-subset is then singular too), if no random start yields a non-singular h-subset,
///   or if the reweighted covariance is singular.
pub fn estimate(data: ArrayView2<f64>, config: &McdConfig) -> FaciesResult<RobustCovariance> {
    let h = validate_input(data, config)?;
    let (n, p) = data.dim();
    info!(
        "Estimating MCD covariance: {} rows, {} columns, retaining h={} (alpha={}).",
        n, p, h, config.alpha
    );
    let start_time = std::time::Instant::now();

    // A singular full-data covariance makes every subset singular: fail before the search.
    let full = Candidate::from_rows(data, (0..n).collect()).map_err(|e| match e {
        FaciesError::SingularCovariance(msg) => FaciesError::SingularCovariance(format!(
            "Covariance of all {} rows is singular (exact fit): {}",
            n, msg
        )),
        other => other,
    })?;

    let best = if h == n {
        full
    } else {
        search_minimum_determinant(data, h, config)?
    };

    let raw_log_determinant = best.log_determinant();
    let mut raw_covariance = best.covariance.clone();
    raw_covariance *= consistency_factor(p, h as f64 / n as f64)?;
    let raw_factor = CholeskyFactor::factorize(&raw_covariance)?;
    let mut support = vec![false; n];
    for &row in &best.rows {
        support[row] = true;
    }

    let (center, covariance, factor) = if config.reweight && h < n {
        let raw_distances = squared_distances(data, &best.center, &raw_factor);
        let cutoff = ChiSquared::new(p as f64)
            .map_err(|e| FaciesError::InvalidInput(format!("chi-square({}) unavailable: {}", p, e)))?
            .inverse_cdf(REWEIGHT_QUANTILE);
        let kept: Vec<usize> = (0..n).filter(|&i| raw_distances[i] <= cutoff).collect();
        debug!(
            "MCD reweighting keeps {} of {} rows (cutoff {:.4}).",
            kept.len(),
            n,
            cutoff
        );
        if kept.len() <= p {
            return Err(FaciesError::SingularCovariance(format!(
                "Only {} rows survive reweighting in {} dimensions.",
                kept.len(),
                p
            )));
        }
        let (center, mut covariance) = mean_and_covariance(data, &kept)?;
        covariance *= consistency_factor(p, kept.len() as f64 / n as f64)?;
        let factor = CholeskyFactor::factorize(&covariance)?;
        (center, covariance, factor)
    } else {
        (best.center.clone(), raw_covariance.clone(), raw_factor)
    };

    let mahalanobis = squared_distances(data, &center, &factor);
    info!("MCD estimate completed in {:?}.", start_time.elapsed());

    Ok(RobustCovariance {
        center,
        covariance,
        raw_center: best.center,
        raw_covariance,
        raw_log_determinant,
        support,
        mahalanobis,
        h,
    })
}

fn search_minimum_determinant(
    data: ArrayView2<f64>,
    h: usize,
    config: &McdConfig,
) -> FaciesResult<Candidate> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut starts: Vec<Candidate> = Vec::with_capacity(config.num_starts);
    let mut singular_starts = 0usize;

    for _ in 0..config.num_starts {
        let Some(start) = random_start(data, &mut rng) else {
            singular_starts += 1;
            continue;
        };
        // Two concentration steps per start; a singular h-subset discards the start.
        let refined = start
            .concentrate(data, h)
            .and_then(|c| c.concentrate(data, h));
        match refined {
            Ok(candidate) => starts.push(candidate),
            Err(_) => singular_starts += 1,
        }
    }
    debug!(
        "MCD: {} usable starts, {} singular starts.",
        starts.len(),
        singular_starts
    );
    if starts.is_empty() {
        return Err(FaciesError::SingularCovariance(format!(
            "None of {} MCD starts produced a non-singular h-subset of {} rows.",
            config.num_starts, h
        )));
    }

    starts.sort_by(|a, b| {
        a.log_determinant()
            .partial_cmp(&b.log_determinant())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    starts.truncate(config.num_candidates);

    let mut best: Option<Candidate> = None;
    for mut current in starts {
        for _ in 0..config.max_c_steps {
            match current.concentrate(data, h) {
                Ok(next) if next.log_determinant() < current.log_determinant() => current = next,
                _ => break,
            }
        }
        let improves = best
            .as_ref()
            .map_or(true, |b| current.log_determinant() < b.log_determinant());
        if improves {
            best = Some(current);
        }
    }
    best.ok_or_else(|| FaciesError::SingularCovariance("No MCD candidate survived.".into()))
}
