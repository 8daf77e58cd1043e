// src/hierarchical.rs
//
// Agglomerative clustering with Ward's minimum-variance linkage.

use crate::error::{FaciesError, FaciesResult};
use log::debug;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// One agglomeration step.
///
/// `left` and `right` are row indices representing the two merged clusters
/// (each cluster is represented by one of its member rows).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    /// Ward distance between the two clusters, `sqrt(2 * increase in within-cluster SS)`.
    pub height: f64,
    /// Number of rows in the merged cluster.
    pub size: usize,
}

/// Complete merge history over `n` rows, ordered by non-decreasing height.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dendrogram {
    n_rows: usize,
    merges: Vec<Merge>,
}

/// Condensed upper-triangle storage of a symmetric matrix with zero diagonal.
struct CondensedMatrix {
    n: usize,
    values: Vec<f64>,
}

impl CondensedMatrix {
    fn squared_euclidean(data: ArrayView2<f64>) -> Self {
        let n = data.nrows();
        let mut values = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            let row_i = data.row(i);
            for j in (i + 1)..n {
                let d2: f64 = row_i
                    .iter()
                    .zip(data.row(j).iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                values.push(d2);
            }
        }
        CondensedMatrix { n, values }
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        self.n * a - a * (a + 1) / 2 + (b - a - 1)
    }

    #[inline]
    fn get(&self, i: usize, j: usize) -> f64 {
        self.values[self.index(i, j)]
    }

    #[inline]
    fn set(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.index(i, j);
        self.values[idx] = value;
    }
}

/// Disjoint-set forest used to cut the dendrogram.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind { parent: (0..n).collect() }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

impl Dendrogram {
    /// Builds the Ward dendrogram of the rows of `data` with the nearest-neighbour chain algorithm.
    ///
    /// Distances are squared Euclidean and updated with the Lance–Williams formula
    /// `d(k, i∪j) = ((n_i + n_k) d(k,i) + (n_j + n_k) d(k,j) - n_k d(i,j)) / (n_i + n_j + n_k)`.
    ///
    /// # Errors
    /// Returns `InvalidInput` for an empty matrix or non-finite coordinates.
    pub fn ward(data: ArrayView2<f64>) -> FaciesResult<Self> {
        let n = data.nrows();
        if n == 0 || data.ncols() == 0 {
            return Err(FaciesError::InvalidInput(
                "Hierarchical clustering needs at least one row and one column.".into(),
            ));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(FaciesError::InvalidInput(
                "Hierarchical clustering input contains non-finite values.".into(),
            ));
        }

        let mut distances = CondensedMatrix::squared_euclidean(data);
        let mut sizes = vec![1usize; n];
        let mut active = vec![true; n];
        let mut chain: Vec<usize> = Vec::with_capacity(n);
        let mut merges: Vec<Merge> = Vec::with_capacity(n.saturating_sub(1));

        while merges.len() + 1 < n {
            if chain.is_empty() {
                let first = active.iter().position(|&a| a).unwrap_or(0);
                chain.push(first);
            }

            // Grow the chain until the last two entries are reciprocal nearest neighbours.
            let (x, y, d_xy) = loop {
                let x = chain[chain.len() - 1];
                let previous = if chain.len() >= 2 { Some(chain[chain.len() - 2]) } else { None };

                let mut nearest = previous;
                let mut nearest_d = previous.map_or(f64::INFINITY, |p| distances.get(x, p));
                for k in 0..n {
                    if !active[k] || k == x {
                        continue;
                    }
                    let d = distances.get(x, k);
                    if d < nearest_d {
                        nearest_d = d;
                        nearest = Some(k);
                    }
                }
                // `nearest` is always set: at least two clusters are active here.
                let y = nearest.unwrap_or(x);
                if Some(y) == previous {
                    chain.pop();
                    chain.pop();
                    break (x, y, nearest_d);
                }
                chain.push(y);
            };

            let (keep, absorbed) = (x.min(y), x.max(y));
            let (size_x, size_y) = (sizes[x] as f64, sizes[y] as f64);
            for k in 0..n {
                if !active[k] || k == x || k == y {
                    continue;
                }
                let size_k = sizes[k] as f64;
                let updated = ((size_x + size_k) * distances.get(x, k)
                    + (size_y + size_k) * distances.get(y, k)
                    - size_k * d_xy)
                    / (size_x + size_y + size_k);
                distances.set(keep, k, updated.max(0.0));
            }
            active[absorbed] = false;
            sizes[keep] = sizes[x] + sizes[y];
            merges.push(Merge {
                left: keep,
                right: absorbed,
                height: d_xy.max(0.0).sqrt(),
                size: sizes[keep],
            });
        }

        // Chain order is not height order; a stable sort keeps dependent merges in sequence on ties.
        merges.sort_by(|a, b| a.height.partial_cmp(&b.height).unwrap_or(std::cmp::Ordering::Equal));
        debug!("Built Ward dendrogram over {} rows.", n);
        Ok(Dendrogram { n_rows: n, merges })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Cuts the tree into exactly `k` flat clusters.
    ///
    /// Labels are `1..=k`, numbered by first appearance in row order; their
    /// identity carries no meaning beyond grouping.
    pub fn cut(&self, k: usize) -> FaciesResult<Vec<usize>> {
        if k == 0 || k > self.n_rows {
            return Err(FaciesError::InvalidInput(format!(
                "Cluster count must lie in [1, {}], got {}.",
                self.n_rows, k
            )));
        }
        let mut forest = UnionFind::new(self.n_rows);
        for merge in self.merges.iter().take(self.n_rows - k) {
            forest.union(merge.left, merge.right);
        }

        let mut root_labels: Vec<Option<usize>> = vec![None; self.n_rows];
        let mut next_label = 1usize;
        let mut labels = Vec::with_capacity(self.n_rows);
        for row in 0..self.n_rows {
            let root = forest.find(row);
            let label = *root_labels[root].get_or_insert_with(|| {
                let assigned = next_label;
                next_label += 1;
                assigned
            });
            labels.push(label);
        }
        Ok(labels)
    }
}

/// Ward clustering of `data` cut to `k` clusters.
pub fn ward_labels(data: ArrayView2<f64>, k: usize) -> FaciesResult<Vec<usize>> {
    if k == 0 || k > data.nrows() {
        return Err(FaciesError::InvalidInput(format!(
            "Cluster count must lie in [1, {}], got {}.",
            data.nrows(),
            k
        )));
    }
    Dendrogram::ward(data)?.cut(k)
}
