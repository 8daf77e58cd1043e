use crate::error::FaciesError;
use crate::hierarchical::{ward_labels, Dendrogram};
use crate::test_data::{gaussian_blobs, generate_random_data};

use approx::assert_abs_diff_eq;
use ndarray::array;
use std::collections::BTreeSet;

#[test]
fn ward_heights_follow_the_variance_criterion() {
    let data = array![[0.0], [1.0], [10.0]];
    let tree = Dendrogram::ward(data.view()).unwrap();
    let merges = tree.merges();
    assert_eq!(merges.len(), 2);
    assert_abs_diff_eq!(merges[0].height, 1.0, epsilon = 1e-12);
    assert_eq!(merges[0].size, 2);
    // sqrt(2 * 2 * 1 / 3 * 9.5^2)
    assert_abs_diff_eq!(merges[1].height, (361.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    assert_eq!(merges[1].size, 3);

    let pair = array![[0.0, 0.0], [3.0, 4.0]];
    let tree = Dendrogram::ward(pair.view()).unwrap();
    assert_abs_diff_eq!(tree.merges()[0].height, 5.0, epsilon = 1e-12);
}

#[test]
fn every_cut_has_exactly_k_labels() {
    let data = generate_random_data(30, 2, 61);
    let tree = Dendrogram::ward(data.view()).unwrap();
    assert_eq!(tree.n_rows(), 30);
    assert_eq!(tree.merges().len(), 29);
    for pair in tree.merges().windows(2) {
        assert!(pair[0].height <= pair[1].height);
    }
    for k in 1..=30 {
        let labels = tree.cut(k).unwrap();
        assert_eq!(labels.len(), 30);
        let distinct: BTreeSet<usize> = labels.iter().copied().collect();
        assert_eq!(distinct, (1..=k).collect::<BTreeSet<usize>>(), "k = {}", k);
        assert_eq!(labels[0], 1);
    }
}

#[test]
fn clustering_is_deterministic() {
    let data = generate_random_data(40, 3, 62);
    let first = ward_labels(data.view(), 4).unwrap();
    let second = ward_labels(data.view(), 4).unwrap();
    assert_eq!(first, second);
}

#[test]
fn duplicate_rows_still_cut_to_k() {
    let data = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [4.0, 4.0], [4.0, 4.0]];
    let labels = ward_labels(data.view(), 2).unwrap();
    assert_eq!(labels, vec![1, 1, 1, 2, 2]);
    let labels = ward_labels(data.view(), 4).unwrap();
    assert_eq!(labels.iter().copied().collect::<BTreeSet<_>>().len(), 4);
}

#[test]
fn separated_blobs_are_recovered() {
    let centers = vec![vec![0.0, 0.0], vec![10.0, 0.0], vec![5.0, 9.0]];
    let (data, truth) = gaussian_blobs(&centers, 12, 0.5, 63);
    let labels = ward_labels(data.view(), 3).unwrap();
    // Blobs are generated in order, so labels by first appearance match blob index + 1.
    let expected: Vec<usize> = truth.iter().map(|t| t + 1).collect();
    assert_eq!(labels, expected);
}

#[test]
fn cluster_count_out_of_range_is_rejected() {
    let data = generate_random_data(5, 2, 64);
    assert!(matches!(ward_labels(data.view(), 0), Err(FaciesError::InvalidInput(_))));
    assert!(matches!(ward_labels(data.view(), 6), Err(FaciesError::InvalidInput(_))));
    let tree = Dendrogram::ward(data.view()).unwrap();
    assert!(tree.cut(6).is_err());
    assert_eq!(tree.cut(5).unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn non_finite_input_is_rejected() {
    let data = array![[0.0, 1.0], [f64::NAN, 2.0]];
    assert!(matches!(Dendrogram::ward(data.view()), Err(FaciesError::InvalidInput(_))));
}

#[test]
fn single_row_has_no_merges() {
    let data = array![[2.0, 3.0]];
    let tree = Dendrogram::ward(data.view()).unwrap();
    assert!(tree.merges().is_empty());
    assert_eq!(tree.cut(1).unwrap(), vec![1]);
}
