//! The complete set of cluster indexes and the handle that swaps it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::catalog::{Catalog, Code};
use crate::error::{CodingError, CodingResult};
use crate::index::{ClusterIndex, ClusteringResult};
use crate::vector::{ClusterId, VectorDimension};

/// Size and members of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster: ClusterId,
    pub size: usize,
    pub codes: Vec<Code>,
}

/// All cluster indexes of one build, keyed by cluster id.
///
/// Each index is independent; replacing one leaves the others untouched.
#[derive(Debug, Clone)]
pub struct IndexSet {
    clusters: BTreeMap<ClusterId, ClusterIndex>,
    dimension: VectorDimension,
}

impl IndexSet {
    /// Creates an empty set for vectors of `dimension`.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            clusters: BTreeMap::new(),
            dimension,
        }
    }

    /// Builds one index per cluster of `result`.
    ///
    /// `embeddings` holds one vector per code in catalog order.
    pub fn build(
        catalog: &Catalog,
        result: &ClusteringResult,
        embeddings: Vec<Vec<f32>>,
        dimension: VectorDimension,
    ) -> CodingResult<Self> {
        if result.catalog_fingerprint != catalog.fingerprint() {
            return Err(CodingError::StaleIndex {
                indexed: result.catalog_fingerprint.clone(),
                loaded: catalog.fingerprint().to_string(),
            });
        }
        if result.assignments.len() != catalog.len() || embeddings.len() != catalog.len() {
            return Err(CodingError::Data {
                reason: format!(
                    "{} assignments and {} embeddings for {} codes",
                    result.assignments.len(),
                    embeddings.len(),
                    catalog.len()
                ),
            });
        }

        let mut grouped: BTreeMap<ClusterId, (Vec<Code>, Vec<Vec<f32>>)> = BTreeMap::new();
        for ((code, embedding), &cluster) in catalog
            .codes()
            .iter()
            .zip(embeddings)
            .zip(&result.assignments)
        {
            let (codes, vectors) = grouped.entry(cluster).or_default();
            codes.push(code.clone());
            vectors.push(embedding);
        }

        let mut set = Self::new(dimension);
        for (cluster, (codes, vectors)) in grouped {
            let mut index = ClusterIndex::new(cluster, dimension);
            index.build(codes, vectors)?;
            set.insert(index)?;
        }

        tracing::debug!(
            clusters = set.len(),
            codes = set.code_count(),
            "built index set"
        );
        Ok(set)
    }

    /// Adds or replaces the index for its cluster, returning the old one.
    ///
    /// # Errors
    /// - `NotBuilt` for an index that was never built
    /// - `DimensionMismatch` if its dimension differs from the set's
    pub fn insert(&mut self, index: ClusterIndex) -> CodingResult<Option<ClusterIndex>> {
        if !index.is_built() {
            return Err(CodingError::NotBuilt {
                target: format!("Cluster index {}", index.cluster()),
            });
        }
        if index.dimension() != self.dimension {
            return Err(CodingError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: index.dimension().get(),
            });
        }
        Ok(self.clusters.insert(index.cluster(), index))
    }

    #[must_use]
    pub fn get(&self, cluster: ClusterId) -> Option<&ClusterIndex> {
        self.clusters.get(&cluster)
    }

    /// Indexes in cluster id order.
    pub fn iter(&self) -> impl Iterator<Item = &ClusterIndex> {
        self.clusters.values()
    }

    pub(crate) fn clusters(&self) -> &BTreeMap<ClusterId, ClusterIndex> {
        &self.clusters
    }

    /// Number of clusters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// True when no cluster holds any code.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.values().all(ClusterIndex::is_empty)
    }

    /// Total number of codes across clusters.
    #[must_use]
    pub fn code_count(&self) -> usize {
        self.clusters.values().map(ClusterIndex::len).sum()
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Cluster sizes and members, sorted by cluster id.
    #[must_use]
    pub fn summaries(&self) -> Vec<ClusterSummary> {
        self.clusters
            .values()
            .map(|index| ClusterSummary {
                cluster: index.cluster(),
                size: index.len(),
                codes: index.entries().iter().map(|e| e.code.clone()).collect(),
            })
            .collect()
    }
}

/// Shared, atomically swappable reference to the active index set.
///
/// Readers take an `Arc` snapshot and keep using it even if a rebuild
/// installs a new set in the meantime.
#[derive(Debug, Default)]
pub struct IndexHandle {
    current: RwLock<Option<Arc<IndexSet>>>,
}

impl IndexHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The active set, if one is installed.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<IndexSet>> {
        self.current.read().clone()
    }

    /// Installs `set`, returning the previously active one.
    pub fn install(&self, set: IndexSet) -> Option<Arc<IndexSet>> {
        self.current.write().replace(Arc::new(set))
    }

    /// Installs `set` only if nothing is active yet; returns the active set.
    pub fn install_if_empty(&self, set: IndexSet) -> Arc<IndexSet> {
        let mut current = self.current.write();
        current.get_or_insert_with(|| Arc::new(set)).clone()
    }

    pub fn clear(&self) -> Option<Arc<IndexSet>> {
        self.current.write().take()
    }
}
