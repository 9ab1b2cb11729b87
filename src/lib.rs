//! Semantic ICD-10 code assignment for clinical note text.
//!
//! A catalog of codes is embedded and partitioned offline into clusters; each
//! cluster gets its own vector index. At query time a note is embedded once,
//! searched against every cluster, and the best-scoring code wins.

pub mod assign;
pub mod catalog;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod index;
pub mod logging;
pub mod vector;

// Explicit exports for better API clarity
pub use assign::{
    AssignmentSink, Candidate, JsonLinesSink, Match, MemorySink, SearchCoordinator,
    note_source_id, reduce,
};
pub use catalog::{Catalog, Code, CodeId};
pub use config::Settings;
pub use engine::{BuildReport, CodingEngine, create_generator};
pub use error::{CodingError, CodingResult};
pub use index::{
    ClusterBuilder, ClusterIndex, ClusterSummary, ClusteringResult, IndexManifest, IndexSet,
    IndexStore,
};
pub use vector::{
    ClusterId, EmbeddingGenerator, FastEmbedGenerator, HashingEmbeddingGenerator, Linkage, Score,
    VectorDimension,
};
