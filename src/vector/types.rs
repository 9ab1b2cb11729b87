//! Type-safe wrappers and core types for the vector layer.
//!
//! Newtypes keep entry ids, cluster ids, scores and dimensions from being
//! mixed up with plain integers and floats.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimension of the default fastembed model (all-MiniLM-L6-v2).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Identifier of one stored vector inside a cluster index.
///
/// Entry ids are 1-based positions within the cluster, so the stored vector
/// can always be mapped back to the code it was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(NonZeroU32);

impl EntryId {
    /// Creates a new `EntryId`, returning `None` for zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Entry id for the zero-based position `index`.
    ///
    /// Returns `None` if the position does not fit in a `u32`.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index + 1).ok().and_then(Self::new)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Zero-based position of this entry.
    #[must_use]
    pub fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.get().to_le_bytes()
    }

    /// Creates from little-endian bytes. Returns `None` for zero.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::new(u32::from_le_bytes(bytes))
    }
}

/// Identifier of a cluster (partition) of the code catalog.
///
/// Cluster ids are 1-based and ordered; the reducer relies on that order to
/// break exact score ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(NonZeroU32);

impl ClusterId {
    /// Creates a new `ClusterId`, returning `None` for zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Cluster id for the zero-based label `label`.
    #[must_use]
    pub fn from_label(label: usize) -> Option<Self> {
        u32::try_from(label + 1).ok().and_then(Self::new)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Similarity score in the range [0.0, 1.0].
///
/// - 1.0 means the vectors point in the same direction
/// - 0.5 means they are orthogonal
/// - 0.0 means they point in opposite directions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the value is NaN or outside [0.0, 1.0].
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be in range [0.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    /// Maps a cosine similarity in [-1, 1] onto [0, 1].
    ///
    /// The mapping is monotone, so ranking by score equals ranking by cosine.
    /// Rounding noise just outside the cosine range is clamped; NaN maps to 0.
    #[must_use]
    pub fn from_cosine(cosine: f32) -> Self {
        if cosine.is_nan() {
            return Self::zero();
        }
        Self(((1.0 + cosine) / 2.0).clamp(0.0, 1.0))
    }

    /// A score of 0.0.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    /// A score of 1.0.
    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl TryFrom<f32> for Score {
    type Error = VectorError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Score> for f32 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Vector dimension, validated to be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension`. Returns an error for zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// The 384-dimensional default.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Errors that can occur during vector operations.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure codes and notes are embedded with the same model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error("Invalid entry id: {0}\nSuggestion: Entry ids are 1-based and must fit in 32 bits")]
    InvalidEntryId(usize),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with 'chartcoder build'"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}
