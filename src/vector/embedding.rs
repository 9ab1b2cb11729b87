//! Embedding providers.
//!
//! The engine only talks to the [`EmbeddingGenerator`] trait. Two providers
//! ship with the crate:
//!
//! - [`FastEmbedGenerator`]: local ONNX sentence-embedding models through
//!   fastembed (AllMiniLML6V2 by default).
//! - [`HashingEmbeddingGenerator`]: a deterministic, offline feature-hashing
//!   embedder over character trigrams. It needs no model download and is what
//!   the test suite and benchmarks run against.

use std::path::PathBuf;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::vector::{VectorDimension, VectorError};

/// Name used in configuration for the hashing provider.
pub const HASHING_MODEL_NAME: &str = "hashing";

/// Trait for turning text into fixed-length vectors.
///
/// Implementations must be thread-safe and deterministic: embedding the same
/// text twice yields the same vector.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts, preserving input order.
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Generate the embedding of a single text.
    fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.generate_embeddings(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| {
                VectorError::EmbeddingFailed("Provider returned no embedding".to_string())
            })
    }

    /// Dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Name of the underlying model, recorded in the index manifest.
    fn model_name(&self) -> &str;
}

/// Parses a configured model name into a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        "NomicEmbedTextV15" => Ok(EmbeddingModel::NomicEmbedTextV15),
        other => Err(VectorError::EmbeddingFailed(format!(
            "Unknown embedding model '{other}'. Supported: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small, NomicEmbedTextV15, {HASHING_MODEL_NAME}"
        ))),
    }
}

/// Default directory for downloaded fastembed models.
#[must_use]
pub fn default_models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("chartcoder")
        .join("models")
}

/// fastembed-backed generator.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: VectorDimension,
}

impl std::fmt::Debug for FastEmbedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedGenerator")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("model", &"<TextEmbedding>")
            .finish()
    }
}

impl FastEmbedGenerator {
    /// Loads `model_name` from `cache_dir`, downloading it on first use.
    ///
    /// # Errors
    /// Returns an error if the name is unknown or the model fails to load.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = parse_embedding_model(model_name)?;

        let has_cached_models = cache_dir.exists()
            && cache_dir
                .read_dir()
                .is_ok_and(|mut entries| entries.any(|_| true));
        if has_cached_models {
            tracing::info!(model = model_name, "loading embedding model from cache");
        } else {
            tracing::info!(model = model_name, "downloading embedding model (first time only)");
        }

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        // Probe the output width instead of hardcoding it per model
        let probe = text_model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;
        let width = probe.first().map(Vec::len).unwrap_or_default();
        let dimension = VectorDimension::new(width)?;

        Ok(Self {
            model: Mutex::new(text_model),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        if embeddings.len() != texts.len() {
            return Err(VectorError::EmbeddingFailed(format!(
                "Model returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Deterministic feature-hashing embedder.
///
/// Each text is lowercased and split into alphanumeric words. Every word
/// contributes its own token plus the character trigrams of ` word ` (padded
/// with spaces). Features are hashed with SHA-256 into `dimension` signed
/// buckets and the result is normalized to unit length. Inflections such as
/// "migraine" and "migraines" share most trigrams and land close together.
///
/// Text without any alphanumeric content yields a zero vector; empty input is
/// rejected.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingGenerator {
    dimension: VectorDimension,
}

impl HashingEmbeddingGenerator {
    /// Creates a hashing generator producing `dimension`-wide vectors.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        if text.trim().is_empty() {
            return Err(VectorError::EmbeddingFailed(
                "Cannot embed empty or whitespace-only text".to_string(),
            ));
        }

        let dim = self.dimension.get();
        let mut embedding = vec![0.0f32; dim];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            add_feature(&mut embedding, "w", word);

            let padded: Vec<char> = std::iter::once(' ')
                .chain(word.chars())
                .chain(std::iter::once(' '))
                .collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                add_feature(&mut embedding, "g", &gram);
            }
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }

        Ok(embedding)
    }
}

fn add_feature(embedding: &mut [f32], kind: &str, feature: &str) {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(feature.as_bytes());
    let digest = hasher.finalize();

    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    let hash = u64::from_le_bytes(word);

    let bucket = (hash % embedding.len() as u64) as usize;
    let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
    embedding[bucket] += sign;
}

impl EmbeddingGenerator for HashingEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        texts.iter().map(|text| self.embed_one(text)).collect()
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        HASHING_MODEL_NAME
    }
}

/// Mock embedding generator for testing.
///
/// Returns fixed vectors for registered texts, fails for texts registered
/// as failures, and falls back to hashing for everything else.
#[cfg(test)]
pub struct MockEmbeddingGenerator {
    fallback: HashingEmbeddingGenerator,
    fixed: std::collections::HashMap<String, Vec<f32>>,
    failing: std::collections::HashSet<String>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockEmbeddingGenerator {
    /// Create a mock with the given dimension.
    #[must_use]
    pub fn with_dimension(dimension: VectorDimension) -> Self {
        Self {
            fallback: HashingEmbeddingGenerator::new(dimension),
            fixed: std::collections::HashMap::new(),
            failing: std::collections::HashSet::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Register a fixed vector for `text`.
    #[must_use]
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.to_string(), vector);
        self
    }

    /// Make embedding `text` fail.
    #[must_use]
    pub fn with_failure(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    /// Number of `generate_embeddings` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl EmbeddingGenerator for MockEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        texts
            .iter()
            .map(|text| {
                if self.failing.contains(*text) {
                    return Err(VectorError::EmbeddingFailed(format!(
                        "mock failure for '{text}'"
                    )));
                }
                match self.fixed.get(*text) {
                    Some(vector) => Ok(vector.clone()),
                    None => self.fallback.embed_one(text),
                }
            })
            .collect()
    }

    fn dimension(&self) -> VectorDimension {
        self.fallback.dimension
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
