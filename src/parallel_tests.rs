use crate::error::FaciesError;
use crate::mixture::{run_subsample_fits, MixtureConfig, RunAccumulator, SubsampleRequest};
use crate::parallel::{fan_out_workers, iteration_shares, merge_aggregates, run_parallel_fits, FanOutConfig};
use crate::test_data::gaussian_blobs;

use ndarray::Array2;
use rand::RngCore;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

fn blobs() -> Array2<f64> {
    let centers = vec![vec![0.0, 0.0], vec![7.0, 1.0], vec![1.0, 7.0], vec![8.0, 8.0]];
    gaussian_blobs(&centers, 15, 0.8, 51).0
}

#[test]
fn shares_give_the_remainder_to_the_first_worker() {
    assert_eq!(iteration_shares(10, 4), vec![4, 2, 2, 2]);
    assert_eq!(iteration_shares(8, 4), vec![2, 2, 2, 2]);
    assert_eq!(iteration_shares(3, 4), vec![3, 0, 0, 0]);
    assert_eq!(iteration_shares(0, 2), vec![0, 0]);
    assert!(iteration_shares(5, 0).is_empty());
    for (n_iter, workers) in [(1000, 7), (17, 3), (1, 1)] {
        assert_eq!(iteration_shares(n_iter, workers).iter().sum::<usize>(), n_iter);
    }
}

#[test]
fn worker_streams_are_independent_and_reproducible() {
    let fan_out = FanOutConfig { num_workers: 3, seed: 77 };
    let a = fan_out.worker_rng(0).next_u64();
    let b = fan_out.worker_rng(1).next_u64();
    assert_ne!(a, b);
    assert_eq!(a, fan_out.worker_rng(0).next_u64());
}

#[test]
fn fan_out_equals_sequential_workers_merged_in_order() {
    let data = blobs();
    let request = SubsampleRequest { n_pdfs: 4, sample_size: 45, n_iter: 10 };
    let config = MixtureConfig::default();
    let fan_out = FanOutConfig { num_workers: 4, seed: 5 };

    let parallel = run_parallel_fits(data.view(), &request, &config, &fan_out).unwrap();

    let mut parts = Vec::new();
    for (worker, share) in iteration_shares(request.n_iter, fan_out.num_workers).into_iter().enumerate() {
        let worker_request = SubsampleRequest { n_iter: share, ..request.clone() };
        let mut rng = fan_out.worker_rng(worker);
        parts.push(run_subsample_fits(data.view(), &worker_request, &config, &mut rng).unwrap());
    }
    let part_bests: Vec<Option<f64>> = parts.iter().map(|p| p.best().map(|b| b.log_likelihood)).collect();
    let part_errors: usize = parts.iter().map(|p| p.n_errors()).sum();
    let sequential = merge_aggregates(4, parts).unwrap();

    assert_eq!(parallel.log_likelihoods(), sequential.log_likelihoods());
    assert_eq!(parallel.n_errors(), part_errors);
    assert_eq!(parallel.attempted(), 10);
    if let Some(best) = parallel.best() {
        for part_best in part_bests.into_iter().flatten() {
            assert!(best.log_likelihood >= part_best);
        }
        assert_eq!(Some(&best.labels), sequential.best().map(|b| &b.labels));
    } else {
        assert!(sequential.best().is_none());
    }
}

#[test]
fn same_seed_reproduces_the_fan_out() {
    let data = blobs();
    let request = SubsampleRequest { n_pdfs: 3, sample_size: 40, n_iter: 9 };
    let config = MixtureConfig::default();
    let fan_out = FanOutConfig { num_workers: 3, seed: 13 };
    let first = run_parallel_fits(data.view(), &request, &config, &fan_out).unwrap();
    let second = run_parallel_fits(data.view(), &request, &config, &fan_out).unwrap();
    assert_eq!(first.log_likelihoods(), second.log_likelihoods());
    assert_eq!(first.n_errors(), second.n_errors());
}

#[test]
fn merge_keeps_the_earlier_worker_on_ties() {
    use crate::mixture::{ClusterFitResult, MixtureParameters};
    use ndarray::Array1;

    let fit = |marker: usize| ClusterFitResult {
        n_pdfs: 1,
        labels: vec![1],
        log_likelihood: -1.0,
        bic: -2.0,
        em_iterations: marker,
        parameters: MixtureParameters {
            weights: Array1::from(vec![1.0]),
            means: Array2::zeros((1, 1)),
            covariances: vec![Array2::eye(1)],
        },
    };
    let mut first = RunAccumulator::new(1);
    first.record(Ok(fit(10)));
    let mut second = RunAccumulator::new(1);
    second.record(Ok(fit(20)));
    let empty = RunAccumulator::new(1);

    let merged = merge_aggregates(1, vec![empty.finish(), first.finish(), second.finish()]).unwrap();
    assert_eq!(merged.best_fit().unwrap().em_iterations, 10);
    assert_eq!(merged.worst_fit().unwrap().em_iterations, 10);
    assert_eq!(merged.log_likelihoods().len(), 2);
}

#[test]
fn fatal_errors_abort_the_fan_out() {
    let data = blobs();
    let config = MixtureConfig::default();
    let no_workers = FanOutConfig { num_workers: 0, seed: 1 };
    let request = SubsampleRequest { n_pdfs: 2, sample_size: 30, n_iter: 4 };
    assert!(matches!(
        run_parallel_fits(data.view(), &request, &config, &no_workers),
        Err(FaciesError::InvalidInput(_))
    ));

    let oversized = SubsampleRequest { n_pdfs: 2, sample_size: 61, n_iter: 4 };
    assert!(matches!(
        run_parallel_fits(data.view(), &oversized, &config, &FanOutConfig::default()),
        Err(FaciesError::InvalidInput(_))
    ));
}

#[test]
fn more_workers_than_iterations_is_fine() {
    let data = blobs();
    let request = SubsampleRequest { n_pdfs: 2, sample_size: 30, n_iter: 2 };
    let fan_out = FanOutConfig { num_workers: 16, seed: 3 };
    let aggregate = run_parallel_fits(data.view(), &request, &MixtureConfig::default(), &fan_out).unwrap();
    assert_eq!(aggregate.attempted(), 2);
}

#[test]
fn pool_threads_are_released_when_a_worker_fails_or_panics() {
    static STARTED: AtomicUsize = AtomicUsize::new(0);
    static EXITED: AtomicUsize = AtomicUsize::new(0);

    struct ExitMarker;
    impl Drop for ExitMarker {
        fn drop(&mut self) {
            EXITED.fetch_add(1, Ordering::SeqCst);
        }
    }
    thread_local! {
        static MARKER: RefCell<Option<ExitMarker>> = const { RefCell::new(None) };
    }
    fn mark_thread() {
        MARKER.with(|marker| {
            let mut marker = marker.borrow_mut();
            if marker.is_none() {
                STARTED.fetch_add(1, Ordering::SeqCst);
                *marker = Some(ExitMarker);
            }
        });
    }

    let fan_out = FanOutConfig { num_workers: 4, seed: 9 };

    let failed = fan_out_workers(8, &fan_out, |worker, _, _| {
        mark_thread();
        if worker == 2 {
            Err(FaciesError::InvalidInput("worker 2 failed".into()))
        } else {
            Ok(RunAccumulator::new(1).finish())
        }
    });
    assert!(matches!(failed, Err(FaciesError::InvalidInput(_))));

    let panicked = catch_unwind(AssertUnwindSafe(|| {
        fan_out_workers(8, &fan_out, |worker, _, _| {
            mark_thread();
            if worker == 1 {
                panic!("worker 1 panicked");
            }
            Ok(RunAccumulator::new(1).finish())
        })
    }));
    assert!(panicked.is_err());

    // Pool threads exit asynchronously after the pool is dropped.
    let deadline = Instant::now() + Duration::from_secs(5);
    while EXITED.load(Ordering::SeqCst) < STARTED.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(STARTED.load(Ordering::SeqCst) > 0);
    assert_eq!(EXITED.load(Ordering::SeqCst), STARTED.load(Ordering::SeqCst));

    let data = blobs();
    let request = SubsampleRequest { n_pdfs: 2, sample_size: 30, n_iter: 4 };
    let aggregate = run_parallel_fits(data.view(), &request, &MixtureConfig::default(), &fan_out).unwrap();
    assert_eq!(aggregate.attempted(), 4);
}
