//! Partitioning the catalog into similarity clusters.
//!
//! The builder embeds every code's long description, builds one dendrogram
//! over the embeddings and cuts it at each candidate `k`. The cut with the
//! best silhouette score wins; ties go to the smaller `k`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::config::ClusteringConfig;
use crate::error::{CodingError, CodingResult};
use crate::vector::{
    ClusterId, DistanceMatrix, EmbeddingGenerator, VectorDimension, agglomerative_clustering,
    silhouette_score,
};

/// Silhouette score achieved by one candidate cluster count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KScore {
    pub k: usize,
    pub silhouette: f32,
}

/// Outcome of clustering one catalog version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringResult {
    /// Chosen number of clusters
    pub k: usize,
    /// Silhouette score of the chosen partition
    pub silhouette: f32,
    /// Cluster of each code, in catalog order
    pub assignments: Vec<ClusterId>,
    /// Every tried `k` with its score, in increasing `k`
    pub scores: Vec<KScore>,
    /// Fingerprint of the clustered catalog
    pub catalog_fingerprint: String,
}

impl ClusteringResult {
    /// Number of codes per cluster, keyed by cluster id.
    #[must_use]
    pub fn cluster_sizes(&self) -> BTreeMap<ClusterId, usize> {
        let mut sizes = BTreeMap::new();
        for &cluster in &self.assignments {
            *sizes.entry(cluster).or_insert(0) += 1;
        }
        sizes
    }

    /// Catalog positions of the members of `cluster`.
    pub fn members(&self, cluster: ClusterId) -> impl Iterator<Item = usize> + '_ {
        self.assignments
            .iter()
            .enumerate()
            .filter(move |&(_, &c)| c == cluster)
            .map(|(position, _)| position)
    }
}

/// Offline builder that partitions a catalog.
pub struct ClusterBuilder {
    generator: Arc<dyn EmbeddingGenerator>,
    config: ClusteringConfig,
    batch_size: usize,
}

impl ClusterBuilder {
    pub fn new(
        generator: Arc<dyn EmbeddingGenerator>,
        config: ClusteringConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            generator,
            config,
            batch_size: batch_size.max(1),
        }
    }

    /// Embeds and clusters `catalog`.
    ///
    /// # Errors
    /// - `Data` if the catalog is empty or a description embeds to a zero vector
    /// - `Config` if the k range is invalid for this catalog
    /// - `Embedding` if the provider fails
    pub fn build(&self, catalog: &Catalog) -> CodingResult<ClusteringResult> {
        self.check_catalog(catalog)?;
        let embeddings = self.embed_catalog(catalog)?;
        self.build_with_embeddings(catalog, &embeddings)
    }

    /// Embeds every long description in catalog order, `batch_size` at a time.
    pub fn embed_catalog(&self, catalog: &Catalog) -> CodingResult<Vec<Vec<f32>>> {
        self.check_catalog(catalog)?;

        let dimension = self.generator.dimension();
        let mut embeddings = Vec::with_capacity(catalog.len());

        for (batch_number, batch) in catalog.codes().chunks(self.batch_size).enumerate() {
            let texts: Vec<&str> = batch.iter().map(|c| c.long_description.as_str()).collect();
            let vectors = self.generator.generate_embeddings(&texts)?;
            if vectors.len() != batch.len() {
                return Err(CodingError::Embedding {
                    reason: format!(
                        "provider returned {} embeddings for a batch of {}",
                        vectors.len(),
                        batch.len()
                    ),
                });
            }

            for (code, vector) in batch.iter().zip(&vectors) {
                dimension.validate_vector(vector)?;
                if vector.iter().all(|&x| x == 0.0) {
                    return Err(CodingError::Data {
                        reason: format!(
                            "description of {} embeds to a zero vector: '{}'",
                            code.id, code.long_description
                        ),
                    });
                }
            }

            tracing::debug!(
                batch = batch_number + 1,
                embedded = embeddings.len() + vectors.len(),
                total = catalog.len(),
                "embedded batch"
            );
            embeddings.extend(vectors);
        }

        Ok(embeddings)
    }

    /// Clusters precomputed `embeddings` (one per code, catalog order).
    pub fn build_with_embeddings(
        &self,
        catalog: &Catalog,
        embeddings: &[Vec<f32>],
    ) -> CodingResult<ClusteringResult> {
        self.check_catalog(catalog)?;
        if embeddings.len() != catalog.len() {
            return Err(CodingError::Data {
                reason: format!(
                    "{} embeddings for {} codes",
                    embeddings.len(),
                    catalog.len()
                ),
            });
        }

        tracing::info!(
            codes = catalog.len(),
            k_min = self.config.k_min,
            k_max = self.config.k_max,
            k_step = self.config.k_step,
            linkage = %self.config.linkage,
            "clustering catalog"
        );

        let distances = DistanceMatrix::euclidean(embeddings)?;
        let dendrogram = agglomerative_clustering(&distances, self.config.linkage)?;

        let mut scores = Vec::new();
        let mut best: Option<(KScore, Vec<usize>)> = None;
        for k in self.config.candidates() {
            let labels = dendrogram.cut(k)?;
            let silhouette = silhouette_score(&distances, &labels)?;
            tracing::debug!(k, silhouette, "scored cut");

            let score = KScore { k, silhouette };
            scores.push(score);
            // strict comparison keeps the smaller k on ties
            if best
                .as_ref()
                .is_none_or(|(current, _)| silhouette > current.silhouette)
            {
                best = Some((score, labels));
            }
        }

        let (chosen, labels) = best.ok_or_else(|| CodingError::Config {
            reason: "clustering range contains no cluster count".to_string(),
        })?;

        let assignments = labels
            .into_iter()
            .map(|label| {
                ClusterId::from_label(label).ok_or_else(|| CodingError::Data {
                    reason: format!("cluster label {label} out of range"),
                })
            })
            .collect::<CodingResult<Vec<_>>>()?;

        tracing::info!(
            k = chosen.k,
            silhouette = chosen.silhouette,
            "selected cluster count"
        );

        Ok(ClusteringResult {
            k: chosen.k,
            silhouette: chosen.silhouette,
            assignments,
            scores,
            catalog_fingerprint: catalog.fingerprint().to_string(),
        })
    }

    /// Dimension of the vectors this builder produces.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.generator.dimension()
    }

    fn check_catalog(&self, catalog: &Catalog) -> CodingResult<()> {
        if catalog.is_empty() {
            return Err(CodingError::Data {
                reason: "catalog contains no codes".to_string(),
            });
        }
        self.config.validate_for(catalog.len())
    }
}
