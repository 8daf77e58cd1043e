// src/parallel.rs
//
// Fan-out of repeated-subsample mixture runs over a scoped worker pool.

use crate::error::{FaciesError, FaciesResult};
use crate::mixture::{run_subsample_fits, MixtureConfig, RunAccumulator, RunAggregate, SubsampleRequest};
use log::{debug, info};
use ndarray::ArrayView2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Worker-pool and random-stream configuration of the fan-out driver.
#[derive(Clone, Debug)]
pub struct FanOutConfig {
    /// Number of logical workers. Each gets its own random stream and iteration share.
    pub num_workers: usize,
    /// Seed shared by all workers; worker `w` draws from ChaCha stream `w` of this seed.
    pub seed: u64,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        FanOutConfig {
            num_workers: 4,
            seed: 2025,
        }
    }
}

impl FanOutConfig {
    /// The independent random stream of worker `worker`.
    pub fn worker_rng(&self, worker: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(worker as u64);
        rng
    }
}

/// Splits `n_iter` over `num_workers`: every worker gets `n_iter / num_workers`,
/// and the first worker additionally gets the remainder.
pub fn iteration_shares(n_iter: usize, num_workers: usize) -> Vec<usize> {
    if num_workers == 0 {
        return Vec::new();
    }
    let mut shares = vec![n_iter / num_workers; num_workers];
    shares[0] += n_iter % num_workers;
    shares
}

/// Merges per-worker aggregates in worker order.
pub fn merge_aggregates(n_pdfs: usize, parts: Vec<RunAggregate>) -> FaciesResult<RunAggregate> {
    let mut accumulator = RunAccumulator::new(n_pdfs);
    for part in parts {
        accumulator.absorb(part)?;
    }
    Ok(accumulator.finish())
}

/// Runs `request.n_iter` subsample fits split across a worker pool and merges the results.
///
/// `request.n_iter` is the total budget; it is divided by [`iteration_shares`].
/// The pool is created for this call only and released when it returns, panics
/// included. Its thread count is the worker count capped at the available cores;
/// the logical worker count, and therefore the result, does not depend on the machine.
///
/// # Errors
/// Returns `InvalidInput` for zero workers or any input error raised by a worker,
/// and `InvalidInput` if the pool cannot be built.
pub fn run_parallel_fits(
    data: ArrayView2<f64>,
    request: &SubsampleRequest,
    mixture_config: &MixtureConfig,
    fan_out: &FanOutConfig,
) -> FaciesResult<RunAggregate> {
    if fan_out.num_workers == 0 {
        return Err(FaciesError::InvalidInput("Fan-out needs at least one worker.".into()));
    }
    request.validate(data)?;

    info!(
        "Dispatching {} mixture fits (G={}) to {} workers.",
        request.n_iter, request.n_pdfs, fan_out.num_workers
    );
    let start_time = std::time::Instant::now();

    let parts = fan_out_workers(request.n_iter, fan_out, |worker, share, rng| {
        let worker_request = SubsampleRequest { n_iter: share, ..request.clone() };
        let part = run_subsample_fits(data, &worker_request, mixture_config, rng)?;
        debug!(
            "Worker {} finished {} fits ({} failures).",
            worker,
            part.attempted(),
            part.n_errors()
        );
        Ok(part)
    })?;
    let merged = merge_aggregates(request.n_pdfs, parts)?;
    info!(
        "Mixture fan-out (G={}) completed in {:?}: {} fits, {} failures.",
        request.n_pdfs,
        start_time.elapsed(),
        merged.log_likelihoods().len(),
        merged.n_errors()
    );
    Ok(merged)
}

/// Runs `work(worker, share, rng)` for every logical worker on a pool built for this
/// call and returns the parts in worker order.
///
/// The pool is dropped before returning, whether a worker fails, panics or succeeds;
/// a panic is resumed on the caller after the pool is released.
pub(crate) fn fan_out_workers<F>(n_iter: usize, fan_out: &FanOutConfig, work: F) -> FaciesResult<Vec<RunAggregate>>
where
    F: Fn(usize, usize, &mut ChaCha8Rng) -> FaciesResult<RunAggregate> + Sync,
{
    if fan_out.num_workers == 0 {
        return Err(FaciesError::InvalidInput("Fan-out needs at least one worker.".into()));
    }
    let shares = iteration_shares(n_iter, fan_out.num_workers);
    let available = std::thread::available_parallelism().map_or(1, |n| n.get());
    let num_threads = fan_out.num_workers.min(available);
    debug!("Building a pool of {} threads for {} workers.", num_threads, fan_out.num_workers);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| FaciesError::InvalidInput(format!("Failed to build worker pool: {}", e)))?;

    let partials: Vec<FaciesResult<RunAggregate>> = pool.install(|| {
        shares
            .par_iter()
            .enumerate()
            .map(|(worker, &share)| -> FaciesResult<RunAggregate> {
                let mut rng = fan_out.worker_rng(worker);
                work(worker, share, &mut rng)
            })
            .collect()
    });
    drop(pool);

    partials.into_iter().collect()
}
