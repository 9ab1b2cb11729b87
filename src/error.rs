//! Error types for the code assignment engine
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::vector::{ClusteringError, VectorError, VectorStorageError};

/// Main error type for catalog indexing and code assignment
#[derive(Error, Debug, Clone)]
pub enum CodingError {
    /// Invalid settings or build parameters
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// Malformed or unusable catalog data
    #[error("Invalid catalog data: {reason}")]
    Data { reason: String },

    /// The embedding provider could not embed the input
    #[error("Embedding failed: {reason}")]
    Embedding { reason: String },

    /// Queried before anything was built
    #[error("{target} has not been built yet. Run 'chartcoder build <catalog>' first")]
    NotBuilt { target: String },

    #[error("Embedding dimension mismatch: index expects {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No cluster holds any code
    #[error("The code index is empty: no cluster contains any code")]
    EmptyIndex,

    /// I/O and format errors on the persisted index
    #[error("Index storage error at '{path}': {reason}")]
    Storage { path: PathBuf, reason: String },

    /// The persisted index was built from a different catalog
    #[error(
        "Index is stale: built from catalog {indexed}, but the loaded catalog is {loaded}"
    )]
    StaleIndex { indexed: String, loaded: String },
}

impl CodingError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Data { .. } => "DATA_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::NotBuilt { .. } => "NOT_BUILT",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::EmptyIndex => "EMPTY_INDEX",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::StaleIndex { .. } => "STALE_INDEX",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Config { .. } => vec![
                "Check .chartcoder/settings.toml and CC_* environment variables",
                "k_min must be at least 2 and k_max at most the number of codes",
            ],
            Self::Data { .. } => vec![
                "Check that the catalog has icd_code, short_description and long_description columns",
                "Every code needs a unique id and a non-empty long description",
            ],
            Self::Embedding { .. } => vec![
                "Make sure the note text is not empty",
                "Check that the embedding model downloaded correctly (see embedding.cache_dir)",
            ],
            Self::NotBuilt { .. } => vec!["Run 'chartcoder build <catalog>' to build the index"],
            Self::DimensionMismatch { .. } => vec![
                "The index was built with a different embedding model",
                "Rebuild with 'chartcoder build <catalog>' or switch embedding.model back",
            ],
            Self::EmptyIndex => vec!["Rebuild the index from a non-empty catalog"],
            Self::Storage { .. } => vec![
                "Check disk space and permissions in the index directory",
                "Run 'chartcoder build <catalog>' to write a fresh index generation",
            ],
            Self::StaleIndex { .. } => vec![
                "The catalog changed since the index was built",
                "Run 'chartcoder build <catalog>' to rebuild",
            ],
        }
    }

    /// Storage error for `path` from any displayable cause.
    pub fn storage(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<VectorError> for CodingError {
    fn from(error: VectorError) -> Self {
        match error {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            VectorError::EmbeddingFailed(reason) => Self::Embedding { reason },
            VectorError::InvalidDimension { dimension, reason } => Self::Config {
                reason: format!("invalid embedding dimension {dimension}: {reason}"),
            },
            other => Self::Data {
                reason: other.to_string(),
            },
        }
    }
}

impl From<ClusteringError> for CodingError {
    fn from(error: ClusteringError) -> Self {
        match error {
            ClusteringError::InvalidClusterCount(_) | ClusteringError::UnknownLinkage(_) => {
                Self::Config {
                    reason: error.to_string(),
                }
            }
            ClusteringError::VectorError(inner) => inner.into(),
            other => Self::Data {
                reason: other.to_string(),
            },
        }
    }
}

impl From<VectorStorageError> for CodingError {
    fn from(error: VectorStorageError) -> Self {
        match error {
            VectorStorageError::InvalidFormat { path, reason } => Self::Storage { path, reason },
            VectorStorageError::Io(e) => Self::storage("<vector storage>", e),
            VectorStorageError::Vector(inner) => inner.into(),
        }
    }
}

/// Result type alias for coding operations
pub type CodingResult<T> = Result<T, CodingError>;

/// Helper trait for attaching a path to storage errors
pub trait ErrorContext<T> {
    /// Map the error into [`CodingError::Storage`] for `path`
    fn with_path(self, path: &Path) -> CodingResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_path(self, path: &Path) -> CodingResult<T> {
        self.map_err(|e| CodingError::storage(path, e))
    }
}
