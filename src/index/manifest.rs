//! Manifest describing one persisted index generation.
//!
//! The manifest records which model and catalog version the generation was
//! built from, so a loaded index can be checked against the catalog in use.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{CodingError, CodingResult, ErrorContext};
use crate::index::{ClusteringResult, IndexSet, KScore};
use crate::vector::{ClusterId, Linkage};

const MANIFEST_FILE: &str = "manifest.json";

/// Size of one persisted cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestCluster {
    pub id: ClusterId,
    pub size: usize,
}

/// Metadata for one index generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Version of the manifest format
    pub version: u32,

    /// Name of the embedding model used
    pub model_name: String,

    /// Dimension of embeddings
    pub dimension: usize,

    /// Linkage the dendrogram was built with
    pub linkage: Linkage,

    /// Chosen number of clusters
    pub k: usize,

    /// Silhouette score of the chosen partition
    pub silhouette: f32,

    /// Every tried cluster count with its score
    pub scores: Vec<KScore>,

    /// Fingerprint of the catalog the index was built from
    pub catalog_fingerprint: String,

    /// Number of indexed codes
    pub code_count: usize,

    pub created_at: DateTime<Utc>,

    pub clusters: Vec<ManifestCluster>,
}

impl IndexManifest {
    /// Current manifest version
    pub const CURRENT_VERSION: u32 = 1;

    /// Describes `set`, built by `model_name` from `result`.
    pub fn new(
        result: &ClusteringResult,
        set: &IndexSet,
        model_name: impl Into<String>,
        linkage: Linkage,
    ) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            model_name: model_name.into(),
            dimension: set.dimension().get(),
            linkage,
            k: result.k,
            silhouette: result.silhouette,
            scores: result.scores.clone(),
            catalog_fingerprint: result.catalog_fingerprint.clone(),
            code_count: set.code_count(),
            created_at: Utc::now(),
            clusters: set
                .iter()
                .map(|index| ManifestCluster {
                    id: index.cluster(),
                    size: index.len(),
                })
                .collect(),
        }
    }

    /// Fails with `StaleIndex` unless the index was built from `catalog`.
    pub fn check_catalog(&self, catalog: &Catalog) -> CodingResult<()> {
        if self.catalog_fingerprint != catalog.fingerprint() {
            return Err(CodingError::StaleIndex {
                indexed: short(&self.catalog_fingerprint).to_string(),
                loaded: catalog.short_fingerprint().to_string(),
            });
        }
        Ok(())
    }

    /// Save the manifest into `dir`
    pub fn save(&self, dir: &Path) -> CodingResult<()> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).with_path(&manifest_path)?;
        std::fs::write(&manifest_path, json).with_path(&manifest_path)?;
        Ok(())
    }

    /// Load the manifest from `dir`
    pub fn load(dir: &Path) -> CodingResult<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let json = std::fs::read_to_string(&manifest_path).with_path(&manifest_path)?;
        let manifest: Self = serde_json::from_str(&json).with_path(&manifest_path)?;

        // Check version compatibility
        if manifest.version > Self::CURRENT_VERSION {
            return Err(CodingError::storage(
                &manifest_path,
                format!(
                    "manifest version {} is newer than supported version {}",
                    manifest.version,
                    Self::CURRENT_VERSION
                ),
            ));
        }

        Ok(manifest)
    }

    /// Check if a manifest exists in `dir`
    #[must_use]
    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).exists()
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..8).unwrap_or(fingerprint)
}
