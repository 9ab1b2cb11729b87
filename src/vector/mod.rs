//! Vector layer: embeddings, clustering and on-disk vector storage.
//!
//! Everything here is independent of the ICD-10 domain. The index and assign
//! modules build on these pieces.
//!
//! # Architecture
//! Code descriptions are embedded once, clustered with agglomerative
//! clustering (the number of clusters picked by silhouette score), and each
//! cluster's vectors are stored in a memory-mapped file for instant loading.

mod clustering;
mod embedding;
mod storage;
mod types;

// Re-export core types for public API
pub use clustering::{
    ClusteringError, Dendrogram, DistanceMatrix, Linkage, Merge, agglomerative_clustering,
    cosine_similarity, euclidean_distance, silhouette_score,
};
#[cfg(test)]
pub use embedding::MockEmbeddingGenerator;
pub use embedding::{
    EmbeddingGenerator, FastEmbedGenerator, HASHING_MODEL_NAME, HashingEmbeddingGenerator,
    default_models_dir, parse_embedding_model,
};
pub use storage::{MmapVectorStorage, VectorStorageError};
pub use types::{ClusterId, EntryId, Score, VECTOR_DIMENSION_384, VectorDimension, VectorError};
