use facies_cluster::mcd::{self, McdConfig};
use facies_cluster::pipeline::{mixture_column_name, ward_column_name};
use facies_cluster::{
    run_parallel_fits, validate_labels, ward_labels, ArtifactStore, ClassificationConfig, FaciesClassifier,
    FaciesError, FanOutConfig, MixtureConfig, RobustPca, SubsampleRequest,
};

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

const LITHOLOGIES: [&str; 5] = ["clay", "diatom ooze", "silt", "sand", "tephra"];

/// 100 downcore samples in three variables: five facies on a pentagon of radius 10
/// in the first two variables, flat in the third.
fn core_observations(seed: u64) -> (Array2<f64>, Vec<Option<&'static str>>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let mut data = Array2::<f64>::zeros((100, 3));
    let mut lithology = Vec::with_capacity(100);
    for row in 0..100 {
        let facies = row / 20;
        let angle = 2.0 * std::f64::consts::PI * facies as f64 / 5.0;
        data[[row, 0]] = 10.0 * angle.cos() + noise.sample(&mut rng);
        data[[row, 1]] = 10.0 * angle.sin() + noise.sample(&mut rng);
        data[[row, 2]] = noise.sample(&mut rng);
        lithology.push(Some(LITHOLOGIES[facies]));
    }
    (data, lithology)
}

fn projected_scores(data: &Array2<f64>, n_pcs: usize) -> Array2<f64> {
    let config = McdConfig { alpha: 0.98, ..McdConfig::default() };
    let robust = mcd::estimate(data.view(), &config).unwrap();
    let pca = RobustPca::fit(data.view(), &robust).unwrap();
    pca.scores_prefix(n_pcs).unwrap().to_owned()
}

#[test]
fn mixture_clusters_match_lithology() {
    let (data, lithology) = core_observations(2025);
    let scores = projected_scores(&data, 2);
    let request = SubsampleRequest::from_fraction(100, 0.75, 5, 20).unwrap();
    let aggregate = run_parallel_fits(
        scores.view(),
        &request,
        &MixtureConfig::default(),
        &FanOutConfig::default(),
    )
    .unwrap();

    assert!(aggregate.n_errors() < 20, "all {} fits failed", aggregate.n_errors());
    assert_eq!(aggregate.attempted(), 20);
    let best = aggregate.best_fit().unwrap();
    assert_eq!(best.labels.len(), 100);
    let stats = validate_labels(&lithology, &best.labels).unwrap();
    assert!(stats.cramers_v > 0.8, "Cramér's V = {}", stats.cramers_v);
}

#[test]
fn ward_clusters_match_lithology() {
    let (data, lithology) = core_observations(2025);
    let scores = projected_scores(&data, 2);
    let labels = ward_labels(scores.view(), 5).unwrap();
    let stats = validate_labels(&lithology, &labels).unwrap();
    assert!(stats.cramers_v > 0.8, "Cramér's V = {}", stats.cramers_v);
    assert_eq!(stats.degrees_of_freedom, 16);
}

#[test]
fn invalid_alpha_and_subsample_are_rejected() {
    let (data, _) = core_observations(7);
    for alpha in [0.0, 1.0, 1.3] {
        let config = McdConfig { alpha, ..McdConfig::default() };
        assert!(matches!(
            mcd::estimate(data.view(), &config),
            Err(FaciesError::InvalidInput(_))
        ));
    }

    let scores = projected_scores(&data, 2);
    let oversized = SubsampleRequest { n_pdfs: 3, sample_size: 101, n_iter: 4 };
    assert!(matches!(
        run_parallel_fits(scores.view(), &oversized, &MixtureConfig::default(), &FanOutConfig::default()),
        Err(FaciesError::InvalidInput(_))
    ));
    assert!(SubsampleRequest::from_fraction(100, 1.5, 3, 4).is_err());
}

fn small_config() -> ClassificationConfig {
    ClassificationConfig {
        principal_component_counts: vec![2, 3],
        cluster_counts: vec![3, 5],
        n_iter: 6,
        fan_out: FanOutConfig { num_workers: 2, seed: 11 },
        ..ClassificationConfig::default()
    }
}

#[test]
fn classifier_builds_tables_for_every_configuration() {
    let (data, lithology) = core_observations(99);
    let output = FaciesClassifier::new(small_config()).classify(data.view()).unwrap();

    assert_eq!(output.mixture_runs.len(), 4);
    assert_eq!(output.ward_runs.len(), 4);
    assert_eq!(output.robust_pca.n_components(), 3);
    assert!(output.mixture_run(3, 5).is_some());
    assert!(output.ward_run(2, 4).is_none());

    let depth: Vec<f64> = (0..100).map(|i| 100.0 + 0.05 * i as f64).collect();
    let table = output.results_table(&depth).unwrap();
    assert_eq!(table.n_rows(), 100);
    assert_eq!(table.columns().len(), 8);
    assert_eq!(table.columns()[0].name, mixture_column_name(2, 3));
    assert!(table.column(&ward_column_name(3, 5)).is_some());

    let mut buffer = Vec::new();
    table.write_tsv(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert_eq!(text.lines().count(), 101);
    assert!(text.starts_with("depth\tmixture_2PC_3\tmixture_2PC_5\t"));

    let statistics = output.statistics_table(&lithology).unwrap();
    assert_eq!(statistics.rows().len(), 8);
    let ward = statistics.get(&ward_column_name(2, 5)).unwrap();
    assert!(ward.cramers_v > 0.8);
}

#[test]
fn classifier_rejects_bad_configurations() {
    let (data, _) = core_observations(5);
    let too_many_pcs = ClassificationConfig {
        principal_component_counts: vec![4],
        ..small_config()
    };
    assert!(matches!(
        FaciesClassifier::new(too_many_pcs).classify(data.view()),
        Err(FaciesError::InvalidInput(_))
    ));

    let no_clusters = ClassificationConfig {
        cluster_counts: vec![],
        ..small_config()
    };
    assert!(FaciesClassifier::new(no_clusters).classify(data.view()).is_err());
}

#[test]
fn artifacts_round_trip_through_the_store() {
    let (data, _) = core_observations(123);
    let config = ClassificationConfig {
        principal_component_counts: vec![2],
        cluster_counts: vec![5],
        ..small_config()
    };
    let output = FaciesClassifier::new(config).classify(data.view()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().join("artifacts"), "U1474");
    output.save_artifacts(&store).unwrap();
    assert!(store.robust_pca_path(2).ends_with("U1474_rpca_2PC.bin"));
    assert!(store.mixture_path(2, 5).exists());

    let pca = store.load_robust_pca(2).unwrap();
    assert_eq!(pca.n_components(), 2);
    assert_eq!(pca.scores(), &output.robust_pca.scores_prefix(2).unwrap().to_owned());

    let saved = &output.mixture_run(2, 5).unwrap().aggregate;
    let loaded = store.load_mixture_run(2, 5).unwrap();
    assert_eq!(loaded.log_likelihoods(), saved.log_likelihoods());
    assert_eq!(loaded.n_errors(), saved.n_errors());
    assert_eq!(
        loaded.best().map(|b| b.labels.clone()),
        saved.best().map(|b| b.labels.clone())
    );

    assert!(matches!(store.load_mixture_run(2, 4), Err(FaciesError::Artifact(_))));
}
