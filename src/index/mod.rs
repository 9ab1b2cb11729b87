//! Cluster indexes over the code catalog.
//!
//! [`ClusterBuilder`] partitions a catalog, [`IndexSet`] holds one
//! [`ClusterIndex`] per partition, and [`IndexStore`] persists index sets as
//! atomically swapped generations.

mod builder;
mod cluster_index;
mod index_set;
mod manifest;
mod store;

pub use builder::{ClusterBuilder, ClusteringResult, KScore};
pub use cluster_index::{ClusterIndex, IndexEntry, ScoredCode};
pub use index_set::{ClusterSummary, IndexHandle, IndexSet};
pub use manifest::{IndexManifest, ManifestCluster};
pub use store::IndexStore;
