//! Searchable index over the codes of one cluster.
//!
//! Each index owns its codes and their embeddings and ranks them by cosine
//! similarity. On disk an index is two files in a generation directory:
//! `cluster_<id>.vec` (vectors) and `cluster_<id>.json` (entries).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::Code;
use crate::error::{CodingError, CodingResult, ErrorContext};
use crate::vector::{
    ClusterId, EntryId, MmapVectorStorage, Score, VectorDimension, cosine_similarity,
};

/// One stored code with the entry id that maps its vector back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub entry_id: EntryId,
    #[serde(flatten)]
    pub code: Code,
}

/// A code returned by a query, with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCode {
    pub entry_id: EntryId,
    pub code: Code,
    pub score: Score,
}

/// On-disk form of the entries file.
#[derive(Debug, Serialize, Deserialize)]
struct EntriesFile {
    cluster_id: ClusterId,
    dimension: usize,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone)]
struct BuiltIndex {
    entries: Vec<IndexEntry>,
    vectors: Vec<Vec<f32>>,
}

/// Index over one cluster's codes.
#[derive(Debug, Clone)]
pub struct ClusterIndex {
    cluster: ClusterId,
    dimension: VectorDimension,
    built: Option<BuiltIndex>,
}

impl ClusterIndex {
    /// Creates an unbuilt index; queries fail until [`ClusterIndex::build`].
    #[must_use]
    pub fn new(cluster: ClusterId, dimension: VectorDimension) -> Self {
        Self {
            cluster,
            dimension,
            built: None,
        }
    }

    /// Stores `codes` with their `embeddings`, replacing any previous content.
    ///
    /// Entry ids follow the input order, so rebuilding with the same input
    /// yields the same index.
    pub fn build(&mut self, codes: Vec<Code>, embeddings: Vec<Vec<f32>>) -> CodingResult<()> {
        if codes.len() != embeddings.len() {
            return Err(CodingError::Data {
                reason: format!(
                    "cluster {}: {} codes but {} embeddings",
                    self.cluster,
                    codes.len(),
                    embeddings.len()
                ),
            });
        }
        for vector in &embeddings {
            self.dimension.validate_vector(vector)?;
        }

        let entries = codes
            .into_iter()
            .enumerate()
            .map(|(position, code)| {
                let entry_id = EntryId::from_index(position).ok_or_else(|| CodingError::Data {
                    reason: format!("cluster {} holds too many codes", self.cluster),
                })?;
                Ok(IndexEntry { entry_id, code })
            })
            .collect::<CodingResult<Vec<_>>>()?;

        self.built = Some(BuiltIndex {
            entries,
            vectors: embeddings,
        });
        Ok(())
    }

    /// Returns the `top_k` most similar codes, best first.
    ///
    /// Scores are `(1 + cosine) / 2`. Equal scores keep entry order.
    ///
    /// # Errors
    /// - `NotBuilt` before [`ClusterIndex::build`]
    /// - `DimensionMismatch` if `query` has the wrong length
    pub fn query(&self, query: &[f32], top_k: usize) -> CodingResult<Vec<ScoredCode>> {
        let built = self.built.as_ref().ok_or_else(|| CodingError::NotBuilt {
            target: format!("Cluster index {}", self.cluster),
        })?;
        self.dimension.validate_vector(query)?;

        let mut scored: Vec<(usize, Score)> = built
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, Score::from_cosine(cosine_similarity(query, vector))))
            .collect();
        // stable sort keeps entry order among equal scores
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(position, score)| {
                let entry = &built.entries[position];
                ScoredCode {
                    entry_id: entry.entry_id,
                    code: entry.code.clone(),
                    score,
                }
            })
            .collect())
    }

    #[must_use]
    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Number of stored codes (0 when unbuilt).
    #[must_use]
    pub fn len(&self) -> usize {
        self.built.as_ref().map_or(0, |b| b.entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored entries in entry order.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        self.built.as_ref().map_or(&[], |b| b.entries.as_slice())
    }

    /// Writes the vector and entries files into `dir`.
    pub fn save(&self, dir: &Path) -> CodingResult<()> {
        let built = self.built.as_ref().ok_or_else(|| CodingError::NotBuilt {
            target: format!("Cluster index {}", self.cluster),
        })?;

        let mut storage = MmapVectorStorage::new(dir, self.cluster, self.dimension);
        let records: Vec<(EntryId, &[f32])> = built
            .entries
            .iter()
            .zip(&built.vectors)
            .map(|(entry, vector)| (entry.entry_id, vector.as_slice()))
            .collect();
        storage.write_batch(&records).map_err(|e| CodingError::storage(storage.path(), e))?;

        let entries_path = dir.join(Self::entries_file_name(self.cluster));
        let file = EntriesFile {
            cluster_id: self.cluster,
            dimension: self.dimension.get(),
            entries: built.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file).with_path(&entries_path)?;
        std::fs::write(&entries_path, json).with_path(&entries_path)?;

        Ok(())
    }

    /// Restores the index for `cluster` from `dir`.
    pub fn open(dir: &Path, cluster: ClusterId) -> CodingResult<Self> {
        let entries_path = dir.join(Self::entries_file_name(cluster));
        let json = std::fs::read_to_string(&entries_path).with_path(&entries_path)?;
        let file: EntriesFile = serde_json::from_str(&json).with_path(&entries_path)?;

        if file.cluster_id != cluster {
            return Err(CodingError::storage(
                &entries_path,
                format!("entries file belongs to cluster {}", file.cluster_id),
            ));
        }

        let mut storage = MmapVectorStorage::open(dir, cluster).map_err(|e| {
            CodingError::storage(dir.join(MmapVectorStorage::file_name(cluster)), e)
        })?;
        let dimension = storage.dimension();
        if dimension.get() != file.dimension {
            return Err(CodingError::storage(
                storage.path(),
                format!(
                    "vector dimension {} differs from entries dimension {}",
                    dimension.get(),
                    file.dimension
                ),
            ));
        }

        let records = storage
            .read_all_vectors()
            .map_err(|e| CodingError::storage(storage.path(), e))?;
        if records.len() != file.entries.len()
            || records
                .iter()
                .zip(&file.entries)
                .any(|((id, _), entry)| *id != entry.entry_id)
        {
            return Err(CodingError::storage(
                storage.path(),
                format!(
                    "{} vectors do not line up with {} entries",
                    records.len(),
                    file.entries.len()
                ),
            ));
        }

        Ok(Self {
            cluster,
            dimension,
            built: Some(BuiltIndex {
                entries: file.entries,
                vectors: records.into_iter().map(|(_, vector)| vector).collect(),
            }),
        })
    }

    fn entries_file_name(cluster: ClusterId) -> String {
        format!("cluster_{}.json", cluster.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cluster() -> ClusterId {
        ClusterId::new(4).unwrap()
    }

    fn built_index() -> ClusterIndex {
        let mut index = ClusterIndex::new(cluster(), VectorDimension::new(2).unwrap());
        index
            .build(
                vec![
                    Code::new("R51.9", "Headache", "Headache, unspecified").unwrap(),
                    Code::new("G44.209", "Tension HA", "Tension-type headache").unwrap(),
                    Code::new("G43.909", "Migraine", "Migraine, unspecified").unwrap(),
                ],
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]],
            )
            .unwrap();
        index
    }

    #[test]
    fn test_query_ranks_by_cosine() {
        let index = built_index();
        let results = index.query(&[0.0, 2.0], 3).unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.code.id.as_str()).collect();
        assert_eq!(ids, vec!["G44.209", "G43.909", "R51.9"]);
        assert_eq!(results[0].score, Score::one());
        assert!((results[1].score.get() - 0.9).abs() < 1e-6);
        assert!((results[2].score.get() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_query_top_k_and_ties() {
        let mut index = ClusterIndex::new(cluster(), VectorDimension::new(2).unwrap());
        index
            .build(
                vec![
                    Code::new("B", "b", "second").unwrap(),
                    Code::new("A", "a", "first").unwrap(),
                ],
                vec![vec![1.0, 0.0], vec![1.0, 0.0]],
            )
            .unwrap();

        let results = index.query(&[1.0, 0.0], 1).unwrap();
        assert_eq!(results.len(), 1);
        // equal scores keep entry order
        assert_eq!(results[0].code.id.as_str(), "B");
        assert_eq!(results[0].entry_id.get(), 1);
        assert!(index.query(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_query_before_build() {
        let index = ClusterIndex::new(cluster(), VectorDimension::new(2).unwrap());
        assert!(!index.is_built());
        assert!(matches!(
            index.query(&[1.0, 0.0], 1),
            Err(CodingError::NotBuilt { .. })
        ));
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = built_index();
        assert!(matches!(
            index.query(&[1.0, 0.0, 0.0], 1),
            Err(CodingError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_build_validates_input() {
        let mut index = ClusterIndex::new(cluster(), VectorDimension::new(2).unwrap());
        let code = Code::new("A00", "Cholera", "Cholera").unwrap();
        assert!(matches!(
            index.build(vec![code.clone()], vec![]),
            Err(CodingError::Data { .. })
        ));
        assert!(matches!(
            index.build(vec![code], vec![vec![1.0]]),
            Err(CodingError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_index_is_built() {
        let mut index = ClusterIndex::new(cluster(), VectorDimension::new(2).unwrap());
        index.build(Vec::new(), Vec::new()).unwrap();
        assert!(index.is_built());
        assert!(index.is_empty());
        assert!(index.query(&[1.0, 0.0], 1).unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_with_same_input_is_identical() {
        let first = built_index();
        let mut rebuilt = built_index();
        rebuilt
            .build(
                first.entries().iter().map(|e| e.code.clone()).collect(),
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]],
            )
            .unwrap();

        assert_eq!(rebuilt.entries(), first.entries());
        for query in [[1.0, 0.0], [0.3, 0.7], [-1.0, 0.5]] {
            assert_eq!(rebuilt.query(&query, 3).unwrap(), first.query(&query, 3).unwrap());
        }
    }

    #[test]
    fn test_save_and_open() {
        let temp_dir = TempDir::new().unwrap();
        let index = built_index();
        index.save(temp_dir.path()).unwrap();

        assert!(temp_dir.path().join("cluster_4.vec").exists());
        assert!(temp_dir.path().join("cluster_4.json").exists());

        let reopened = ClusterIndex::open(temp_dir.path(), cluster()).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.entries(), index.entries());
        assert_eq!(
            reopened.query(&[0.6, 0.8], 3).unwrap(),
            index.query(&[0.6, 0.8], 3).unwrap()
        );
    }

    #[test]
    fn test_open_detects_mismatched_files() {
        let temp_dir = TempDir::new().unwrap();
        built_index().save(temp_dir.path()).unwrap();

        let other = ClusterId::new(5).unwrap();
        std::fs::copy(
            temp_dir.path().join("cluster_4.json"),
            temp_dir.path().join("cluster_5.json"),
        )
        .unwrap();
        assert!(matches!(
            ClusterIndex::open(temp_dir.path(), other),
            Err(CodingError::Storage { .. })
        ));

        assert!(matches!(
            ClusterIndex::open(temp_dir.path(), ClusterId::new(9).unwrap()),
            Err(CodingError::Storage { .. })
        ));
    }
}
