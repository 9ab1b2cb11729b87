//! Hierarchical (agglomerative) clustering and silhouette scoring.
//!
//! The clustering works on a condensed Euclidean distance matrix that is
//! computed once per catalog. The full dendrogram is built with the
//! nearest-neighbor-chain algorithm and Lance-Williams distance updates, then
//! cut at any number of clusters without re-clustering. Cuts at different `k`
//! are therefore nested.
//!
//! # Algorithm Details
//! - Distance metric: Euclidean
//! - Linkages: ward (default), average, complete, single
//! - Dendrogram: O(n²) time, O(n²) space (condensed matrix)
//! - Silhouette: O(n²) per partition, parallel over points

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vector::types::VectorError;

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are generated before clustering"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 2 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error(
        "Vector {0} contains NaN or infinite values\nSuggestion: Check the embedding provider output"
    )]
    NonFiniteVector(usize),

    #[error("Label count {actual} does not match {expected} vectors")]
    LabelMismatch { expected: usize, actual: usize },

    #[error("Unknown linkage '{0}'\nSuggestion: Use one of: ward, average, complete, single")]
    UnknownLinkage(String),

    #[error("Vector operation error: {0}")]
    VectorError(#[from] VectorError),
}

/// Linkage criterion used when merging clusters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Minimizes the within-cluster variance increase.
    #[default]
    Ward,
    /// Mean distance between members.
    Average,
    /// Maximum distance between members.
    Complete,
    /// Minimum distance between members.
    Single,
}

impl Linkage {
    /// Lance-Williams update: distance from cluster `k` to the union of `i`
    /// and `j`, given the distances before the merge and the cluster sizes.
    fn update(self, d_ik: f32, d_jk: f32, d_ij: f32, n_i: usize, n_j: usize, n_k: usize) -> f32 {
        let (d_ik, d_jk, d_ij) = (f64::from(d_ik), f64::from(d_jk), f64::from(d_ij));
        let (n_i, n_j, n_k) = (n_i as f64, n_j as f64, n_k as f64);

        let distance = match self {
            Self::Ward => {
                let squared = ((n_i + n_k) * d_ik * d_ik + (n_j + n_k) * d_jk * d_jk
                    - n_k * d_ij * d_ij)
                    / (n_i + n_j + n_k);
                squared.max(0.0).sqrt()
            }
            Self::Average => (n_i * d_ik + n_j * d_jk) / (n_i + n_j),
            Self::Complete => d_ik.max(d_jk),
            Self::Single => d_ik.min(d_jk),
        };
        distance as f32
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ward => "ward",
            Self::Average => "average",
            Self::Complete => "complete",
            Self::Single => "single",
        };
        f.write_str(name)
    }
}

impl FromStr for Linkage {
    type Err = ClusteringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ward" => Ok(Self::Ward),
            "average" => Ok(Self::Average),
            "complete" => Ok(Self::Complete),
            "single" => Ok(Self::Single),
            _ => Err(ClusteringError::UnknownLinkage(s.to_string())),
        }
    }
}

/// Condensed pairwise distance matrix (upper triangle, row-major).
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    n: usize,
    values: Vec<f32>,
}

impl DistanceMatrix {
    /// Computes all pairwise Euclidean distances between `vectors`.
    pub fn euclidean(vectors: &[Vec<f32>]) -> Result<Self, ClusteringError> {
        let first = vectors.first().ok_or(ClusteringError::EmptyVectorSet)?;
        let dimension = first.len();
        if vectors.iter().any(|v| v.len() != dimension) {
            return Err(ClusteringError::DimensionMismatch);
        }
        if let Some(position) = vectors
            .iter()
            .position(|v| v.iter().any(|x| !x.is_finite()))
        {
            return Err(ClusteringError::NonFiniteVector(position));
        }

        let n = vectors.len();
        let values: Vec<f32> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                ((i + 1)..n).map(move |j| euclidean_distance(&vectors[i], &vectors[j]))
            })
            .collect();

        Ok(Self { n, values })
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Distance between points `i` and `j` (0 on the diagonal).
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => self.values[self.offset(i, j)],
            std::cmp::Ordering::Greater => self.values[self.offset(j, i)],
        }
    }

    fn set(&mut self, i: usize, j: usize, value: f32) {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        let offset = self.offset(i, j);
        self.values[offset] = value;
    }

    fn offset(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < j && j < self.n);
        self.n * i - i * (i + 1) / 2 + (j - i - 1)
    }
}

/// One merge step of the dendrogram.
///
/// `left` and `right` are point indices; the merge joins the clusters that
/// currently contain those points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f32,
    pub size: usize,
}

/// Complete merge history of an agglomerative clustering.
#[derive(Debug, Clone)]
pub struct Dendrogram {
    n: usize,
    merges: Vec<Merge>,
}

impl Dendrogram {
    /// Number of clustered points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Merges ordered by increasing distance.
    #[must_use]
    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Cuts the tree into exactly `k` clusters.
    ///
    /// Returns one zero-based label per point. Labels are numbered in order
    /// of each cluster's first point, so the output is deterministic for a
    /// given dendrogram.
    pub fn cut(&self, k: usize) -> Result<Vec<usize>, ClusteringError> {
        if k == 0 || k > self.n {
            return Err(ClusteringError::InvalidClusterCount(k));
        }

        let mut sets = DisjointSet::new(self.n);
        let mut clusters = self.n;
        for merge in &self.merges {
            if clusters == k {
                break;
            }
            // Rounding can reorder a merge before its children; skip no-ops
            if sets.union(merge.left, merge.right) {
                clusters -= 1;
            }
        }

        let mut root_labels = vec![usize::MAX; self.n];
        let mut next_label = 0;
        let labels = (0..self.n)
            .map(|point| {
                let root = sets.find(point);
                if root_labels[root] == usize::MAX {
                    root_labels[root] = next_label;
                    next_label += 1;
                }
                root_labels[root]
            })
            .collect();

        Ok(labels)
    }
}

/// Builds the full dendrogram for the points behind `distances`.
///
/// Uses the nearest-neighbor chain algorithm, which yields the same tree as
/// naive greedy merging for all supported (reducible) linkages. Exact
/// distance ties resolve to the lower point index.
pub fn agglomerative_clustering(
    distances: &DistanceMatrix,
    linkage: Linkage,
) -> Result<Dendrogram, ClusteringError> {
    let n = distances.len();
    if n == 0 {
        return Err(ClusteringError::EmptyVectorSet);
    }

    let mut d = distances.clone();
    // size 0 marks a slot absorbed by a merge
    let mut size = vec![1usize; n];
    let mut chain: Vec<usize> = Vec::with_capacity(n);
    let mut merges = Vec::with_capacity(n - 1);

    for _ in 1..n {
        if chain.is_empty() {
            let first = size
                .iter()
                .position(|&s| s > 0)
                .ok_or(ClusteringError::EmptyVectorSet)?;
            chain.push(first);
        }

        let (x, y, distance) = loop {
            let x = chain[chain.len() - 1];
            let previous = chain.len().checked_sub(2).map(|i| chain[i]);

            let (mut nearest, mut best) = match previous {
                Some(p) => (Some(p), d.get(x, p)),
                None => (None, f32::INFINITY),
            };
            for (i, &s) in size.iter().enumerate() {
                if s == 0 || i == x {
                    continue;
                }
                let candidate = d.get(x, i);
                if candidate < best {
                    best = candidate;
                    nearest = Some(i);
                }
            }

            let nearest = nearest.ok_or(ClusteringError::NonFiniteVector(x))?;
            if Some(nearest) == previous {
                break (x, nearest, best);
            }
            chain.push(nearest);
        };
        chain.truncate(chain.len() - 2);

        let (x, y) = if x < y { (x, y) } else { (y, x) };
        let (n_x, n_y) = (size[x], size[y]);
        merges.push(Merge {
            left: x,
            right: y,
            distance,
            size: n_x + n_y,
        });

        // the merged cluster lives on in slot y
        size[x] = 0;
        size[y] = n_x + n_y;
        for i in 0..n {
            if size[i] == 0 || i == y {
                continue;
            }
            let updated = linkage.update(d.get(i, x), d.get(i, y), distance, n_x, n_y, size[i]);
            d.set(i, y, updated);
        }
    }

    merges.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    Ok(Dendrogram { n, merges })
}

/// Mean silhouette coefficient of a partition.
///
/// For each point, `a` is the mean distance to the other members of its own
/// cluster and `b` the lowest mean distance to any other cluster; the point
/// scores `(b - a) / max(a, b)`. Points in singleton clusters score 0, so a
/// partition into all singletons scores exactly 0.
///
/// `labels` must be zero-based and dense. At least two clusters are required.
pub fn silhouette_score(
    distances: &DistanceMatrix,
    labels: &[usize],
) -> Result<f32, ClusteringError> {
    let n = distances.len();
    if n == 0 {
        return Err(ClusteringError::EmptyVectorSet);
    }
    if labels.len() != n {
        return Err(ClusteringError::LabelMismatch {
            expected: n,
            actual: labels.len(),
        });
    }

    let cluster_count = labels.iter().max().map_or(0, |&max| max + 1);
    let mut sizes = vec![0usize; cluster_count];
    for &label in labels {
        sizes[label] += 1;
    }
    let non_empty = sizes.iter().filter(|&&s| s > 0).count();
    if non_empty < 2 {
        return Err(ClusteringError::InvalidClusterCount(non_empty));
    }

    let total: f64 = (0..n)
        .into_par_iter()
        .map(|i| {
            let own = labels[i];
            if sizes[own] <= 1 {
                return 0.0;
            }

            let mut sums = vec![0.0f64; cluster_count];
            for (j, &label) in labels.iter().enumerate() {
                if j != i {
                    sums[label] += f64::from(distances.get(i, j));
                }
            }

            let a = sums[own] / (sizes[own] - 1) as f64;
            let b = sums
                .iter()
                .zip(&sizes)
                .enumerate()
                .filter(|&(c, (_, &size))| c != own && size > 0)
                .map(|(_, (&sum, &size))| sum / size as f64)
                .fold(f64::INFINITY, f64::min);

            let denominator = a.max(b);
            if denominator > 0.0 {
                (b - a) / denominator
            } else {
                0.0
            }
        })
        .sum();

    Ok((total / n as f64) as f32)
}

/// Computes cosine similarity between two vectors.
///
/// # Returns
/// * Cosine similarity in range [-1, 1], where 1 is most similar; 0 if either
///   vector has zero length
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Euclidean (L2) distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Returns false if `a` and `b` were already joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a == root_b {
            return false;
        }
        let (low, high) = if root_a < root_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[high] = low;
        true
    }
}
