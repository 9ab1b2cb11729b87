//! Per-note search across all cluster indexes.

use std::sync::Arc;

use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::assign::reducer::{self, Candidate, Match};
use crate::error::{CodingError, CodingResult};
use crate::index::{ClusterIndex, IndexSet};
use crate::vector::EmbeddingGenerator;

/// Stable identifier for a note given only its text: `note-<16 hex>` from
/// the SHA-256 of the text. Identical uploads get identical ids.
#[must_use]
pub fn note_source_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex = format!("{digest:x}");
    format!("note-{}", &hex[..16])
}

/// Embeds a note once and queries every cluster index with it.
///
/// Holds a snapshot of the index set; a concurrent rebuild does not affect
/// a coordinator that already exists.
pub struct SearchCoordinator {
    generator: Arc<dyn EmbeddingGenerator>,
    index: Arc<IndexSet>,
    parallel: bool,
}

impl SearchCoordinator {
    pub fn new(generator: Arc<dyn EmbeddingGenerator>, index: Arc<IndexSet>) -> Self {
        Self {
            generator,
            index,
            parallel: true,
        }
    }

    /// Query clusters on the rayon pool (default) or sequentially.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Best code for `note_text`, identified by [`note_source_id`].
    ///
    /// # Errors
    /// - `Embedding` for empty text or a provider failure
    /// - `EmptyIndex` if no cluster holds any code
    /// - `DimensionMismatch` if the provider and index disagree on dimension
    pub fn assign(&self, note_text: &str) -> CodingResult<Match> {
        self.assign_note(&note_source_id(note_text), note_text)
    }

    /// Best code for `note_text`, identified by the caller's `note_id`.
    pub fn assign_note(&self, note_id: &str, note_text: &str) -> CodingResult<Match> {
        let candidates = self.candidates(note_text)?;
        let best = reducer::reduce(note_id, candidates).ok_or(CodingError::EmptyIndex)?;

        tracing::debug!(
            source_id = %best.source_id,
            code = %best.code.id,
            score = %best.score,
            cluster = %best.cluster,
            "assigned code"
        );
        Ok(best)
    }

    /// Top code of every non-empty cluster, in reducer order.
    pub fn candidates(&self, note_text: &str) -> CodingResult<Vec<Candidate>> {
        let embedding = self.embed_note(note_text)?;
        self.candidates_for(&embedding)
    }

    /// Candidates for an already embedded note.
    pub fn candidates_for(&self, embedding: &[f32]) -> CodingResult<Vec<Candidate>> {
        if self.index.is_empty() {
            return Err(CodingError::EmptyIndex);
        }

        let clusters: Vec<&ClusterIndex> = self
            .index
            .iter()
            .filter(|index| !index.is_empty())
            .collect();

        let top = |index: &&ClusterIndex| -> CodingResult<Option<Candidate>> {
            Ok(index
                .query(embedding, 1)?
                .into_iter()
                .next()
                .map(|hit| Candidate {
                    cluster: index.cluster(),
                    code: hit.code,
                    score: hit.score,
                }))
        };

        let found: Vec<Option<Candidate>> = if self.parallel {
            clusters.par_iter().map(top).collect::<CodingResult<_>>()?
        } else {
            clusters.iter().map(top).collect::<CodingResult<_>>()?
        };

        let mut candidates: Vec<Candidate> = found.into_iter().flatten().collect();
        reducer::rank(&mut candidates);
        Ok(candidates)
    }

    fn embed_note(&self, note_text: &str) -> CodingResult<Vec<f32>> {
        if note_text.trim().is_empty() {
            return Err(CodingError::Embedding {
                reason: "note text is empty".to_string(),
            });
        }

        let embedding = self.generator.generate_embedding(note_text)?;
        let expected = self.index.dimension().get();
        if embedding.len() != expected {
            return Err(CodingError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}
